//! Full-sync query set.
//!
//! Seven queries partition the likely job-related space by subject keywords,
//! sender patterns, known ATS domains, and common phrases. The fetch layer
//! fuses results by message id, so overlap between queries is harmless.

use chrono::NaiveDate;

/// Format a date the way the provider's search syntax expects (`YYYY/MM/DD`).
pub fn format_query_date(date: NaiveDate) -> String {
    date.format("%Y/%m/%d").to_string()
}

/// Build the seven-query full-sync set, bounded by an optional date window.
pub fn full_sync_queries(after: Option<NaiveDate>, before: Option<NaiveDate>) -> Vec<String> {
    let mut window = String::new();
    if let Some(after) = after {
        window.push_str(&format!("after:{} ", format_query_date(after)));
    }
    if let Some(before) = before {
        window.push_str(&format!("before:{} ", format_query_date(before)));
    }

    [
        // Subject-based searches
        "subject:(application OR applied OR interview OR assessment OR position OR opportunity OR hiring OR job)",
        "subject:(offer OR rejection OR rejected OR regret OR unfortunately OR congratulations)",
        "subject:(\"thank you for applying\" OR \"thank you for your interest\" OR \"next steps\" OR \"move forward\")",
        // From-based searches
        "from:(noreply OR no-reply OR careers OR recruiting OR talent OR jobs OR hr OR hire OR greenhouse OR lever OR workday)",
        "from:(linkedin.com OR indeed.com OR glassdoor.com OR ziprecruiter.com OR monster.com)",
        // Job board and ATS platforms
        "(from:myworkdayjobs.com OR from:greenhouse.io OR from:lever.co OR from:jobvite.com OR from:icims.com)",
        // Common job-related phrases
        "(\"application received\" OR \"application status\" OR \"interview invitation\" OR \"phone screen\" OR \"technical interview\")",
    ]
    .iter()
    .map(|q| format!("{}{}", window, q))
    .collect()
}
