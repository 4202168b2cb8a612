//! Post-process hooks of the GitHub streams.
//!
//! Each hook is a pure [`PostProcessFn`](tap::PostProcessFn): it reshapes one
//! raw payload and never performs I/O. A missing source field rejects the
//! payload, which the orchestrator reports as a decode error of the stream.

use serde_json::Value;

use tap::{Context, Payload};

/// Promotes `commit.committer.date` to a top-level `commit_timestamp`.
///
/// GitHub does not document whether `since` compares against the author or
/// the committer date; the committer date is used.
pub fn commit_timestamp(mut payload: Payload, _context: &Context) -> Result<Payload, String> {
    let date = payload
        .get("commit")
        .and_then(|c| c.get("committer"))
        .and_then(|c| c.get("date"))
        .cloned()
        .ok_or("commit.committer.date is missing")?;
    payload.insert("commit_timestamp".into(), date);
    Ok(payload)
}

/// Hoists `user.id` to a top-level `user_id`.
pub fn stargazer_user_id(mut payload: Payload, _context: &Context) -> Result<Payload, String> {
    let id = payload
        .get("user")
        .and_then(|u| u.get("id"))
        .cloned()
        .ok_or("user.id is missing")?;
    payload.insert("user_id".into(), id);
    Ok(payload)
}

/// Moves `issue.number` and `issue.url` to top-level `issue_number` and
/// `issue_url`, removing them from the nested `issue` object.
pub fn issue_event_fields(mut payload: Payload, _context: &Context) -> Result<Payload, String> {
    let issue = payload
        .get_mut("issue")
        .and_then(Value::as_object_mut)
        .ok_or("issue is missing")?;
    let number = issue.remove("number").ok_or("issue.number is missing")?;
    let url = issue.remove("url").ok_or("issue.url is missing")?;

    let number = match &number {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("issue.number is not an integer: {number}"))?;

    payload.insert("issue_number".into(), number.into());
    payload.insert("issue_url".into(), url);
    Ok(payload)
}
