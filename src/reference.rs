use crate::digest::Digest;

/// Returns `true` when `reference` parses as a content digest rather than a
/// human-readable tag.
pub fn is_digest_reference(reference: &str) -> bool {
    Digest::parse(reference).is_ok()
}

/// Format a fully-qualified image reference: `repo:tag` for tags, `repo@digest`
/// for digest references, and just `repo` when no reference is given.
pub fn image_reference(repository: &str, reference: &str) -> String {
    if reference.is_empty() {
        repository.to_string()
    } else if is_digest_reference(reference) {
        format!("{}@{}", repository, reference)
    } else {
        format!("{}:{}", repository, reference)
    }
}
