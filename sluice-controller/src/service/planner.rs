//! Task Planner
//!
//! Expands (work item × application) pairs into task specifications. Planning
//! is pure: no I/O, no clock reads. The submission timestamp is an input.

use chrono::{DateTime, Utc};
use sluice_core::domain::application::ApplicationDescriptor;
use sluice_core::domain::pool::NodePlatform;
use sluice_core::domain::signing::SignedUrl;
use sluice_core::domain::task::{OutputBinding, TaskSpec, UploadCondition};
use sluice_core::domain::work_item::WorkItem;

/// Directory, relative to the task working directory, the executable writes to
pub const OUTPUT_DIR: &str = "output";

/// Runtime-provided variable holding the task working directory
pub const WORKING_DIR_VARIABLE: &str = "AZ_BATCH_TASK_WORKING_DIR";

/// Standard output/error files of a task, relative to its working directory
pub const DIAGNOSTIC_PATTERN: &str = "../std*.txt";

/// Longest task id the compute service accepts
pub const MAX_TASK_ID_LENGTH: usize = 64;

/// Longest application id whose task ids stay within [`MAX_TASK_ID_LENGTH`]
/// for plans of up to 999,999,999 tasks (`Task_` + id + 9-digit ordinal +
/// 16-digit stamp + 2 separators)
pub const MAX_APPLICATION_ID_LENGTH: usize = MAX_TASK_ID_LENGTH - 5 - 9 - 16 - 2;

/// Inputs shared by every task of one submission
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub job_id: &'a str,
    pub platform: NodePlatform,

    /// Output container signed for read/write/list
    pub output_container: &'a SignedUrl,

    pub submitted_at: DateTime<Utc>,
}

/// Builds one task per (work item, application) pair
///
/// Tasks are ordered by work item, then by application. The ordinal in each
/// task id counts every task of the plan, starting at 1.
pub fn plan(
    items: &[WorkItem],
    applications: &[ApplicationDescriptor],
    ctx: &PlanContext<'_>,
) -> Vec<TaskSpec> {
    let mut tasks = Vec::with_capacity(items.len() * applications.len());

    for item in items {
        for application in applications {
            let task_id = task_id(application, tasks.len() + 1, ctx.submitted_at);

            tasks.push(TaskSpec {
                command_line: command_line(application, item, ctx.platform),
                input_bindings: vec![item.clone()],
                output_bindings: vec![
                    result_binding(item, ctx.output_container),
                    diagnostic_binding(ctx.job_id, &task_id, ctx.output_container),
                ],
                task_id,
            });
        }
    }

    tasks
}

/// `Task_{applicationId}_{ordinal}_{stamp}`
pub fn task_id(
    application: &ApplicationDescriptor,
    ordinal: usize,
    submitted_at: DateTime<Utc>,
) -> String {
    format!(
        "Task_{}_{}_{}",
        application.id,
        ordinal,
        submitted_at.timestamp_micros()
    )
}

/// Command line running `application` against one input file
///
/// The executable is resolved through the package variable set on the node.
/// The output directory mirrors the item's relative folder so the produced
/// file lands at `output/{relative name}`. Both paths are quoted so each
/// reaches the executable as one literal argument.
pub fn command_line(
    application: &ApplicationDescriptor,
    item: &WorkItem,
    platform: NodePlatform,
) -> String {
    let package = application.package_variable(platform);
    let output_dir = match item.relative_name.rsplit_once('/') {
        Some((parent, _)) => format!("{}/{}", OUTPUT_DIR, parent),
        None => OUTPUT_DIR.to_string(),
    };

    match platform {
        NodePlatform::Windows => format!(
            "cmd /c %{}%\\{} \"%{}%\\{}\" \"%{}%\\{}\"",
            package,
            to_windows(&application.executable),
            WORKING_DIR_VARIABLE,
            to_windows(&item.relative_name),
            WORKING_DIR_VARIABLE,
            to_windows(&output_dir),
        ),
        NodePlatform::Linux => format!(
            "/bin/sh -c \"${}/{} ${}/{} ${}/{}\"",
            package,
            in_double_quotes(&sh_quote(&application.executable)),
            WORKING_DIR_VARIABLE,
            in_double_quotes(&sh_quote(&item.relative_name)),
            WORKING_DIR_VARIABLE,
            in_double_quotes(&sh_quote(&output_dir)),
        ),
    }
}

/// Single-quotes `value` for `sh`, so it stays one literal argument
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Escapes the characters that stay special inside a double-quoted string
fn in_double_quotes(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn to_windows(path: &str) -> String {
    path.replace('/', "\\")
}

fn result_binding(item: &WorkItem, output_container: &SignedUrl) -> OutputBinding {
    OutputBinding {
        file_pattern: format!("{}/{}", OUTPUT_DIR, item.relative_name),
        destination: output_container.clone(),
        destination_path: Some(item.relative_name.clone()),
        upload_condition: UploadCondition::OnSuccess,
    }
}

fn diagnostic_binding(job_id: &str, task_id: &str, output_container: &SignedUrl) -> OutputBinding {
    OutputBinding {
        file_pattern: DIAGNOSTIC_PATTERN.to_string(),
        destination: output_container.clone(),
        destination_path: Some(format!(
            "errorlogs/{}/{}",
            job_id.to_lowercase(),
            task_id.to_lowercase()
        )),
        upload_condition: UploadCondition::OnFailure,
    }
}
