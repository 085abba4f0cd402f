//! Prompts for the chart-classification vision call.
//!
//! All prompt text lives here so the retry and fallback logic in
//! [`crate::graphify::vision`] never has to change when the wording does,
//! and so tests can assert on the schema the model is asked for.

/// Name of the function the generated code must define.
///
/// The sandbox harness looks it up by this exact name.
pub const RECREATE_FN: &str = "recreate_plot";

/// System message sent with every classification request.
pub const SYSTEM_PROMPT: &str = "You convert static images of figures into approximate datasets and minimal plotting code. \
When data is ambiguous, make reasonable numeric approximations and note them in assumptions.";

/// Extra system message prepended when the endpoint rejects `response_format`.
pub const STRICT_JSON_PROMPT: &str = "Respond with strict JSON only.";

/// Description of the reply object, embedded in the user message.
pub const SCHEMA_DESCRIPTION: &str = "Return a JSON object with keys: is_graph (bool), graph_type (string), reason (string), \
data (object with arrays/series suitable for plotting), python_code (string), assumptions (string). \
In python_code, define a function recreate_plot(output_path: str) that recreates the plot using matplotlib \
(Agg backend) and saves to output_path without showing UI.";

/// Build the user instruction, with optional caller-supplied context.
pub fn user_instruction(extra_context: Option<&str>) -> String {
    let mut text = format!(
        "You are a scientific figure analyzer. Determine if the image is a data visualization (graph/chart/plot). \
If yes, extract approximate numeric data and produce Python code to reconstruct it. \
Prefer simple lists of numbers over dataframes. Include title/axes/legend when inferable. \
Do not use external files or network. Do not embed the image itself in output. \
Schema: {SCHEMA_DESCRIPTION} "
    );
    if let Some(ctx) = extra_context.map(str::trim).filter(|c| !c.is_empty()) {
        text.push_str("\nContext: ");
        text.push_str(ctx);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_names_the_entry_point() {
        assert!(SCHEMA_DESCRIPTION.contains(RECREATE_FN));
        assert!(SCHEMA_DESCRIPTION.contains("is_graph"));
    }

    #[test]
    fn context_is_appended_only_when_present() {
        assert!(!user_instruction(None).contains("Context:"));
        assert!(!user_instruction(Some("  ")).contains("Context:"));
        let with = user_instruction(Some("Figures from a 2021 climate report"));
        assert!(with.ends_with("Context: Figures from a 2021 climate report"));
    }
}
