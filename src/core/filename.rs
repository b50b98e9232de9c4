//! Filename resolution for downloaded images
//!
//! Turns an image URL into a flat, filesystem-safe filename. Generic basenames
//! that many products share (`1.webp`, `thumbnail.webp`, ...) are prefixed with
//! the product slug taken from the preceding path segment.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use log::{debug, warn};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use url::Url;

use crate::core::error::Result;

/// Name returned when a URL has no path segments
pub const UNKNOWN_IMAGE_NAME: &str = "unknown_image.jpg";

/// Name substituted when sanitization leaves nothing usable
pub const DEFAULT_FRAGMENT_NAME: &str = "default_image_name";

/// Basenames reused across products that need the slug prefix
static SPECIAL_FILENAMES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["1.webp", "2.webp", "3.webp", "thumbnail.webp"].into_iter().collect());

/// Characters replaced with a hyphen before the whitelist filter runs
const REPLACED_CHARS: [char; 10] = ['\\', '/', '*', '?', ':', '"', '<', '>', '|', ' '];

/// Whether a basename is one of the generic, slug-prefixed names
pub fn is_special_filename(name: &str) -> bool {
    SPECIAL_FILENAMES.contains(name)
}

/// Make a name fragment safe for use as a file name
///
/// Trims whitespace, turns path separators, shell metacharacters and spaces
/// into hyphens, then drops anything that is not an ASCII letter, digit,
/// hyphen, underscore or dot. Idempotent.
pub fn sanitize(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| if REPLACED_CHARS.contains(&c) { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        DEFAULT_FRAGMENT_NAME.to_string()
    } else {
        sanitized
    }
}

/// Split a file name into stem and extension (extension keeps its dot)
///
/// Leading dots do not start an extension, so `.hidden` has none.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if !name[..idx].chars().all(|c| c == '.') => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Base that scheme-less URLs (`//cdn/a/1.webp`, `a/1.webp`) are joined onto
const RELATIVE_URL_BASE: &str = "http://localhost/";

fn parse_image_url(url: &str) -> Result<Url> {
    match Url::parse(url) {
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            debug!("Resolving scheme-less URL {url}");
            Ok(Url::parse(RELATIVE_URL_BASE)?.join(url)?)
        }
        other => Ok(other?),
    }
}

/// Derive the target filename for a URL, failing on unparseable URLs
///
/// Protocol-relative and relative URLs are accepted; only their path is used.
pub fn try_resolve_filename(url: &str) -> Result<String> {
    let parsed = parse_image_url(url)?;

    let segments: Vec<String> = parsed
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .collect();

    let Some(last) = segments.last() else {
        return Ok(UNKNOWN_IMAGE_NAME.to_string());
    };

    if !is_special_filename(last) {
        return Ok(sanitize(last));
    }

    match segments.len() {
        n if n >= 2 => {
            let slug = &segments[n - 2];
            let (base, ext) = split_extension(last);
            Ok(format!("{}-{}{}", sanitize(slug), sanitize(base), ext))
        }
        _ => Ok(sanitize(last)),
    }
}

/// Derive the target filename for a URL
///
/// Never fails: malformed URLs fall back to [`fallback_filename`].
pub fn resolve_filename(url: &str) -> String {
    match try_resolve_filename(url) {
        Ok(name) => name,
        Err(e) => {
            warn!("Error generating filename for URL {url}: {e}");
            fallback_filename(url)
        }
    }
}

/// Best-effort filename from the raw URL text
///
/// Uses the last `/`-separated piece with query and fragment removed, or a
/// hashed placeholder when that piece is empty.
pub fn fallback_filename(url: &str) -> String {
    let without_suffix = url.split(['?', '#']).next().unwrap_or(url);
    let basename = without_suffix.rsplit('/').next().unwrap_or(without_suffix);

    if basename.trim().is_empty() {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        format!("image_{:016x}.jpg", hasher.finish())
    } else {
        sanitize(basename)
    }
}

/// How to handle two URLs of one batch resolving to the same filename
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Append `-2`, `-3`, ... to the stem of later URLs
    #[default]
    Suffix,
    /// Skip later URLs and report them as failed
    Report,
    /// Last write wins; writes to the same file are serialized
    Overwrite,
}

/// One URL and the file it will be written to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedDownload {
    pub url: String,
    pub filename: String,
}

/// A URL left out of the batch because its filename was already taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub url: String,
    pub filename: String,
    pub claimed_by: String,
}

/// Target assignment for a whole batch
#[derive(Debug, Default)]
pub struct DownloadPlan {
    /// Downloads grouped by target file; each group is written in order by a single worker
    pub groups: Vec<Vec<PlannedDownload>>,
    pub collisions: Vec<Collision>,
}

impl DownloadPlan {
    /// Number of URLs covered by this plan, downloaded or not
    pub fn url_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum::<usize>() + self.collisions.len()
    }

    /// Every planned download, in planning order within each group
    pub fn downloads(&self) -> impl Iterator<Item = &PlannedDownload> {
        self.groups.iter().flatten()
    }
}

/// Assign a target filename to every URL before anything is written
///
/// Iteration order of `urls` decides which URL keeps the unsuffixed name.
pub fn plan_targets<'a, I>(urls: I, policy: CollisionPolicy) -> DownloadPlan
where
    I: IntoIterator<Item = &'a str>,
{
    let mut plan = DownloadPlan::default();
    let mut claimed: HashMap<String, usize> = HashMap::new();

    for url in urls {
        let filename = resolve_filename(url);

        let Some(&group_idx) = claimed.get(&filename) else {
            claim(&mut plan, &mut claimed, url, filename);
            continue;
        };

        match policy {
            CollisionPolicy::Suffix => {
                let unique = next_free_name(&filename, &claimed);
                debug!("Filename {filename} already taken, using {unique} for {url}");
                claim(&mut plan, &mut claimed, url, unique);
            }
            CollisionPolicy::Report => {
                let claimed_by = plan.groups[group_idx][0].url.clone();
                warn!("Filename collision: {url} resolves to {filename}, already claimed by {claimed_by}");
                plan.collisions.push(Collision {
                    url: url.to_string(),
                    filename,
                    claimed_by,
                });
            }
            CollisionPolicy::Overwrite => {
                debug!("Filename {filename} shared by several URLs, later writes overwrite");
                plan.groups[group_idx].push(PlannedDownload {
                    url: url.to_string(),
                    filename,
                });
            }
        }
    }

    plan
}

fn claim(plan: &mut DownloadPlan, claimed: &mut HashMap<String, usize>, url: &str, filename: String) {
    claimed.insert(filename.clone(), plan.groups.len());
    plan.groups.push(vec![PlannedDownload {
        url: url.to_string(),
        filename,
    }]);
}

fn next_free_name(filename: &str, claimed: &HashMap<String, usize>) -> String {
    let (stem, ext) = split_extension(filename);
    (2u32..)
        .map(|n| format!("{stem}-{n}{ext}"))
        .find(|candidate| !claimed.contains_key(candidate))
        .unwrap_or_else(|| fallback_filename(filename))
}
