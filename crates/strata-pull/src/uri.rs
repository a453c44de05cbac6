//! URL composition.

use url::Url;

use crate::PullError;

/// Append path segments to a base URL, preserving scheme, authority and
/// query. Segments containing `/` contribute one path component per part;
/// callers pass pre-encoded segments.
pub(crate) fn compose(base: &Url, segments: &[&str]) -> Result<Url, PullError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| PullError::Config(format!("URL '{base}' cannot be a base")))?;
        path.pop_if_empty();
        for segment in segments {
            for part in segment.split('/') {
                if !part.is_empty() {
                    path.push(part);
                }
            }
        }
    }
    Ok(url)
}
