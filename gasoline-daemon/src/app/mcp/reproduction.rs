use crate::domain::capture::{CommandKind, CommandRecord};
use serde_json::{Map, Value};
use std::fmt::Write;

/// Renders completed commands as a Playwright test. Read-only commands are
/// skipped since replaying them has no effect on the page.
pub fn playwright_script(records: &[CommandRecord]) -> String {
    let mut out = String::new();
    out.push_str("import { test } from '@playwright/test';\n\n");
    out.push_str("test('gasoline reproduction', async ({ page }) => {\n");
    for record in records.iter().filter(|record| record.kind.is_mutating()) {
        let _ = writeln!(out, "  {}", step(record.kind, &record.params));
    }
    out.push_str("});\n");
    out
}

fn step(kind: CommandKind, params: &Map<String, Value>) -> String {
    let selector = literal(params, "selector");
    match kind {
        CommandKind::Navigate => format!("await page.goto({});", literal(params, "url")),
        CommandKind::NewTab => format!(
            "await page.goto({}); // opened in a new tab",
            literal(params, "url")
        ),
        CommandKind::Refresh => "await page.reload();".to_string(),
        CommandKind::Back => "await page.goBack();".to_string(),
        CommandKind::Forward => "await page.goForward();".to_string(),
        CommandKind::Click => format!("await page.locator({selector}).click();"),
        CommandKind::Type => {
            let text = literal(params, "text");
            if params.get("clear").and_then(Value::as_bool).unwrap_or(false) {
                format!("await page.locator({selector}).fill({text});")
            } else {
                format!("await page.locator({selector}).pressSequentially({text});")
            }
        }
        CommandKind::SetAttribute => format!(
            "await page.locator({selector}).evaluate((el, [name, value]) => el.setAttribute(name, value), [{}, {}]);",
            literal(params, "name"),
            literal(params, "value")
        ),
        CommandKind::ScrollTo => {
            format!("await page.locator({selector}).scrollIntoViewIfNeeded();")
        }
        CommandKind::Focus => format!("await page.locator({selector}).focus();"),
        CommandKind::Check => format!("await page.locator({selector}).check();"),
        CommandKind::Upload => format!(
            "await page.locator({selector}).setInputFiles({});",
            literal(params, "file_path")
        ),
        CommandKind::ExecuteJs => format!("await page.evaluate({});", literal(params, "script")),
        CommandKind::Highlight => format!("// highlight {selector}"),
        CommandKind::SaveState | CommandKind::LoadState | CommandKind::DeleteState => format!(
            "// {} {}",
            kind,
            literal(params, "snapshot_name")
        ),
        CommandKind::GetText
        | CommandKind::GetValue
        | CommandKind::GetAttribute
        | CommandKind::ListStates
        | CommandKind::QueryDom
        | CommandKind::WaitFor => format!("// {kind}"),
    }
}

/// JSON string literals are valid JavaScript string literals.
fn literal(params: &Map<String, Value>, field: &str) -> String {
    match params.get(field) {
        Some(Value::String(value)) => Value::String(value.clone()).to_string(),
        Some(other) => Value::String(other.to_string()).to_string(),
        None => "\"\"".to_string(),
    }
}
