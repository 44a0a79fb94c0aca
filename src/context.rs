//! Narrative Context Builder — formats recalled memories for the story prompt.
//!
//! Pure formatting; no IO. An empty input yields an empty string, which the
//! story-generation caller reads as "omit the memories section entirely".

use crate::models::SimilarMemory;

/// Month name for a 0-based month index. Out-of-range values (which only a
/// corrupted row could produce) render as "Sometime" rather than panicking in
/// the middle of prompt assembly.
pub fn month_name(month: i32) -> &'static str {
    match month {
        0 => "January",
        1 => "February",
        2 => "March",
        3 => "April",
        4 => "May",
        5 => "June",
        6 => "July",
        7 => "August",
        8 => "September",
        9 => "October",
        10 => "November",
        11 => "December",
        _ => "Sometime",
    }
}

/// Build the prompt-ready memories block from ranked recall results.
pub fn build_story_context(memories: &[SimilarMemory]) -> String {
    if memories.is_empty() {
        return String::new();
    }

    let mut block = String::from(
        "Here are real memories from this child's life that relate to the story:\n",
    );
    for (i, memory) in memories.iter().enumerate() {
        block.push_str(&format!(
            "{}. In {} {}: {}\n",
            i + 1,
            month_name(memory.month),
            memory.year,
            memory.caption
        ));
    }
    block.push_str(
        "Weave one or two of these memories naturally into the story, as moments the child will recognize.",
    );
    block
}

// ============================================================================
// TESTS
// ============================================================================
