use once_cell::sync::Lazy;
use regex::Regex;

/// `UPSTREAM: <token>:` prefix grammar. Case-sensitive, anchored at the
/// start of the subject line.
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^UPSTREAM:\s*<([^>]+)>:\s*").unwrap());

/// Classification of a commit subject. `<carry>` and `<drop>` are the
/// reserved tokens; any other bracketed token is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitTag {
    None,
    Carry,
    Drop,
    Other(String),
}

/// Rule set deciding which dest-only commits are replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TagPolicy {
    #[default]
    None,
    Soft,
    Strict,
}

pub fn classify_subject(subject: &str) -> CommitTag {
    match TAG_RE.captures(subject) {
        None => CommitTag::None,
        Some(captures) => match &captures[1] {
            "carry" => CommitTag::Carry,
            "drop" => CommitTag::Drop,
            other => CommitTag::Other(other.to_string()),
        },
    }
}

/// Policy table:
/// - `none`: everything, including `<drop>`
/// - `soft`: everything except `<drop>`
/// - `strict`: only tagged commits, and never `<drop>`
pub fn included_by_policy(tag: &CommitTag, policy: TagPolicy) -> bool {
    match policy {
        TagPolicy::None => true,
        TagPolicy::Soft => *tag != CommitTag::Drop,
        TagPolicy::Strict => matches!(tag, CommitTag::Carry | CommitTag::Other(_)),
    }
}
