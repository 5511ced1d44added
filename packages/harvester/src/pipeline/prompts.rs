//! Prompt templates for the model-driven stages.

use chrono::{DateTime, Utc};
use serde_json::Value;

pub fn site_search(company: &str, today: DateTime<Utc>) -> String {
    format!(
        "Please find the official website of {company}.\n\
         If possible include the link to the investor relations page/subdomain as well.\n\n\
         Include full links in your answer and list the keywords you searched for.\n\
         Your answer should be structured like this:\n\
         Queries/keywords I used:\n    - your queries go here\n\
         Results:\n    - the links you found go here\n\n\
         The current date is {}.",
        today.format("%Y-%m-%d")
    )
}

pub fn site_retry(company: &str) -> String {
    format!(
        "The links previously retrieved by you for {company} were found to not be working anymore. \
         Try again please, now with different queries. Use the date I provided to look for more \
         recent results and do not return the same links."
    )
}

pub fn site_restate(company: &str) -> String {
    format!(
        "Provide the answer for {company} in a structured manner. \
         Only include links present in your previous message."
    )
}

/// Crawl instruction for one page, with the navigation history so far.
pub fn crawl_step(company: &str, page_markdown: &str, stack: &[String], history: &[Value]) -> String {
    let mut prompt = format!(
        "Extract the direct link to the latest annual financial report of {company} \
         (pdf if available, only stop at html for private companies) from the markdownified webpage below.\n\n\
         If you found it, output: {{\"action\":\"done\", \"link\":\"link goes here\", \"reference_year\":\"YYYY-MM-DD\"}}\n\n\
         If you did not find a direct link, but think one of the links will lead there, output: \
         {{\"action\":\"visit\", \"link_to_visit\":\"link goes here\"}}\n\n\
         If you visited a link but it did not lead where you expected, go back by outputting \
         {{\"action\":\"back\", \"note\":\"very brief message about what you found (2 sentences max)\"}}\n\n\
         If there is a problem or no chance of finding the annual report on this page, output \
         {{\"action\":\"abort\", \"error\":\"error message here\"}}\n\n"
    );

    if !history.is_empty() || !stack.is_empty() {
        prompt.push_str("Here is your current navigation stack:\n");
        prompt.push_str(&stack.join("->"));
        prompt.push_str("\nHere are the actions you have taken so far:\n");
        for event in history {
            let url = event.get("taken_at_url").and_then(Value::as_str).unwrap_or_default();
            let mut action = event.clone();
            if let Value::Object(map) = &mut action {
                map.remove("taken_at_url");
            }
            prompt.push_str(&format!("URL: {url}, Action: {action}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str("webpage:\n");
    prompt.push_str(page_markdown);
    prompt
}

const EXTRACTION_NOTES: &str = "Notes:\n\
    - Extract asset values and net turnover in their most expanded integer form. If the report \
    states them in thousands, millions or billions, input the full value.\n\
    - Likewise extract the employee count as an expanded integer.\n\
    - Only extract information you explicitly found in the attached document.\n\
    - Avoid marketing language when summarizing the main activity. Collect the main industries \
    and sectors the company participates in, ordered by priority where possible.\n";

pub fn extract_attached(company: &str) -> String {
    format!(
        "Extract the relevant financial data of {company} from the attached annual report \
         according to the specified format.\n\n{EXTRACTION_NOTES}"
    )
}

pub fn extract_from_url(company: &str, url: &str, schema: &Value) -> String {
    format!(
        "Extract the relevant financial data of {company} from its annual report.\n\n{EXTRACTION_NOTES}\n\
         IMPORTANT:\n\
         - You can find the report at {url}. Use tools to view the file content, do not answer without it.\n\
         - Output your answer in plain json without any formatting according to the following json schema: {schema}\n"
    )
}

pub fn nace_section(company: &str, level1: &Value, description: &str) -> String {
    format!(
        "Determine the level 1 NACE code of {company} based on the description of the company below.\n\
         Possible NACE codes and their descriptions:\n{}\n\
         Company description:\n{description}\n",
        pretty(level1)
    )
}

pub fn nace_division(company: &str, divisions: &Value) -> String {
    format!(
        "Now choose the level 2 classification of {company} based on the previously seen \
         description of their activities.\n\
         Possible NACE codes and their descriptions:\n{}\n",
        pretty(divisions)
    )
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
