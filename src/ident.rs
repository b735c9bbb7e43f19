//! Identifier codec for the merged runtime namespace.
//!
//! Objects belonging to a non-primary backend are exposed to the kubelet
//! with a selector prefix: `<selector>__<id>` for pod sandbox and container
//! IDs, `<selector>/<image>` for image references. Primary-backend objects
//! are passed through unprefixed. The separators differ because image names
//! legitimately contain `__`.

/// Pod sandbox annotation that selects the target runtime for a sandbox.
pub const TARGET_RUNTIME_ANNOTATION: &str = "kubernetes.io/target-runtime";

/// Separator between a selector and an object ID.
pub const ID_SEPARATOR: &str = "__";

/// Separator between a selector and an image reference.
pub const IMAGE_SEPARATOR: char = '/';

const DIGEST_PREFIX: &str = "sha256:";

/// Attach a selector prefix to an object ID. The empty selector denotes
/// the primary backend and leaves the ID untouched.
pub fn encode_id(selector: &str, inner: &str) -> String {
    if selector.is_empty() {
        inner.to_string()
    } else {
        format!("{}{}{}", selector, ID_SEPARATOR, inner)
    }
}

/// Split an object ID at the first `__`. Returns `None` for unprefixed
/// (primary-backend) IDs. The first separator is authoritative, so the
/// inner ID may itself contain `__`.
pub fn split_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(ID_SEPARATOR)
}

/// Attach a selector prefix to an image reference.
pub fn encode_image(selector: &str, image: &str) -> String {
    if selector.is_empty() {
        image.to_string()
    } else {
        format!("{}{}{}", selector, IMAGE_SEPARATOR, image)
    }
}

/// Split an image reference at the first `/`. The left side is only a
/// selector if it names a registered non-primary backend, which the caller
/// must check; image names such as `docker.io/library/nginx` contain `/`
/// themselves.
pub fn split_image(image: &str) -> Option<(&str, &str)> {
    image.split_once(IMAGE_SEPARATOR)
}

/// A bare content digest. Digests are namespace-free: they resolve to the
/// primary backend unless an out-of-band selector accompanies them, and
/// they are never prefixed in responses.
pub fn is_digest(image: &str) -> bool {
    image.starts_with(DIGEST_PREFIX)
}

/// Selector names are drawn from `[A-Za-z0-9_-]+`. `__` is rejected
/// because the first `__` in an ID is authoritative and a selector
/// containing it would not round-trip.
pub fn is_valid_selector(selector: &str) -> bool {
    !selector.is_empty()
        && !selector.contains(ID_SEPARATOR)
        && selector
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
