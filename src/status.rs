//! HTML rendering of the step registry for the status page.

use std::fmt::Write;

use crate::registry::{BuildOutcome, StepRegistry};

/// Renders the registry as the overview page: one table row per step
/// with its name, building state and last result.
pub fn render_overview_page(registry: &StepRegistry) -> String {
    let mut page = String::new();
    page.push_str("<html><head><title>buildserver overview</title></head><body>");
    page.push_str("<h1>Overview</h1>");
    page.push_str("<table border=\"1\">");
    for (name, step) in registry.iter() {
        let state = if step.is_building { "building.." } else { "idle" };
        let result = match step.last_result {
            None => "not built",
            Some(BuildOutcome::Success) => "last build succeeded",
            Some(BuildOutcome::Failure) => "last build failed",
        };
        // Writes to a String are infallible.
        let _ = write!(
            page,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(name),
            state,
            result
        );
    }
    page.push_str("</table></body></html>");
    page
}

/// Minimal HTML escape for text content.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StepRegistry;

    #[test]
    fn renders_building_and_failed_rows_in_order() {
        let mut registry = StepRegistry::new(["a", "b"]);
        registry.set_building("a", true);
        registry.record_result("b", BuildOutcome::Failure);

        let page = render_overview_page(&registry);

        let row_a = "<tr><td>a</td><td>building..</td><td>not built</td></tr>";
        let row_b = "<tr><td>b</td><td>idle</td><td>last build failed</td></tr>";
        assert!(page.contains(row_a), "page was: {page}");
        assert!(page.contains(row_b), "page was: {page}");
        // Registry iteration order: a before b.
        assert!(page.find(row_a).unwrap() < page.find(row_b).unwrap());
    }

    #[test]
    fn renders_success_text() {
        let mut registry = StepRegistry::new(["app"]);
        registry.record_result("app", BuildOutcome::Success);
        assert!(render_overview_page(&registry)
            .contains("<td>app</td><td>idle</td><td>last build succeeded</td>"));
    }

    #[test]
    fn escapes_step_names() {
        let registry = StepRegistry::new(["<script>&"]);
        let page = render_overview_page(&registry);
        assert!(page.contains("&lt;script&gt;&amp;"));
        assert!(!page.contains("<script>"));
    }
}
