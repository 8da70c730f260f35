//! Extraction instruction sent to the agent runtime.
//!
//! Both backend strategies deliver the same natural-language instruction;
//! the agent reads the PDF at `{input}` and writes CSV to `{output}` itself.
//! Callers can override the default via
//! [`crate::config::ServiceConfig::prompt_template`].

use std::path::Path;

/// Default instruction. `{input}` and `{output}` are replaced with absolute
/// paths before use.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"Extract every table from the PDF file at {input} and save the result as a CSV file at {output}.

Follow these rules precisely:

1. CSV FORMAT
   - The first row of each table is a header row
   - Quote fields containing commas, quotes or newlines (RFC 4180); double embedded quotes
   - Write UTF-8 without a byte-order mark

2. MULTIPLE TABLES
   - Write one block per table, in reading order
   - Separate blocks with a single empty line
   - Merge a table that continues across pages into one block

3. CONTENT
   - Preserve cell text exactly; do not summarise or translate
   - Leave empty cells empty
   - Ignore page numbers, running headers and footers

4. OUTPUT
   - Write ONLY the CSV file; do not add commentary inside it
   - If the document contains no tables, write an empty file
   - Reply with a one-line summary of what was written"#;

/// Render the instruction for one job.
pub fn extraction_prompt(input: &Path, output: &Path, template: Option<&str>) -> String {
    template
        .unwrap_or(DEFAULT_EXTRACTION_PROMPT)
        .replace("{input}", &input.display().to_string())
        .replace("{output}", &output.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_names_both_paths() {
        let p = extraction_prompt(
            Path::new("/srv/uploads/1-ab.pdf"),
            Path::new("/srv/outputs/1-ab.csv"),
            None,
        );
        assert!(p.contains("/srv/uploads/1-ab.pdf"));
        assert!(p.contains("/srv/outputs/1-ab.csv"));
        assert!(!p.contains("{input}"));
        assert!(!p.contains("{output}"));
    }

    #[test]
    fn template_override_is_used() {
        let p = extraction_prompt(
            Path::new("a.pdf"),
            Path::new("a.csv"),
            Some("read {input} -> {output}"),
        );
        assert_eq!(p, "read a.pdf -> a.csv");
    }
}
