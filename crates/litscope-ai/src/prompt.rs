pub const SYSTEM_PROMPT: &str = "You are a scientific summarization engine. \
Write a faithful, self-contained summary of the research paper provided by the user. \
Cover the research question, methods, key results and their limitations. \
Use the paper's own terminology, write in plain academic prose, \
do not address the reader, do not mention yourself, and do not include code.";

pub const TRUNCATION_MARKER: &str = "\n\n[... text truncated ...]";

/// Cut `text` to at most `max_chars` characters, appending a marker when cut.
pub fn truncate_source(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((byte_idx, _)) => {
            let mut out = text[..byte_idx].trim_end().to_string();
            out.push_str(TRUNCATION_MARKER);
            out
        }
    }
}

/// User prompt for one paper.
pub fn build_summary_prompt(title: &str, citation_key: &str, text: &str, max_chars: usize) -> String {
    let body = truncate_source(text, max_chars);
    format!(
        "Summarize the following paper.\n\nTitle: {title}\nCitation key: {citation_key}\n\n\
         --- BEGIN PAPER TEXT ---\n{body}\n--- END PAPER TEXT ---\n"
    )
}
