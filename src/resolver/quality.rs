//! Quality option parsing and selection for episode pages.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::browser::PageDocument;
use crate::error::{PaheError, Result};

/// Selector for the download menu links on an episode page.
pub const DOWNLOAD_MENU_LINKS: &str = "#pickDownload a.dropdown-item";

/// One entry of an episode page's download menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityOption {
    pub resolution: u32,
    pub is_dub: bool,
    /// Gateway link for this option.
    pub url: String,
    /// Menu text, e.g. "SubsPlease · 1080p".
    pub text: String,
}

fn resolution_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)p").ok()).as_ref()
}

/// Dubbed entries carry a warning badge naming the audio language.
fn is_dub_marker(outer_html: &str) -> bool {
    outer_html.contains("badge-warning") && (outer_html.contains("eng") || outer_html.contains("chi"))
}

/// Parse every usable option from the download menu, in page order.
///
/// Options without a positive resolution or an href are skipped. When a
/// (resolution, dub) pair is listed twice, the first listing is kept.
pub fn parse_quality_options(doc: &PageDocument) -> Vec<QualityOption> {
    let mut options: Vec<QualityOption> = Vec::new();

    for link in doc.find(DOWNLOAD_MENU_LINKS) {
        let Some(href) = link.attr("href").filter(|h| !h.is_empty()) else {
            continue;
        };
        let Some(resolution) = resolution_regex()
            .and_then(|re| re.captures(&link.text))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .filter(|r| *r > 0)
        else {
            debug!("Skipping download entry without resolution: {}", link.text);
            continue;
        };
        let is_dub = is_dub_marker(&link.outer_html);

        if options
            .iter()
            .any(|o| o.resolution == resolution && o.is_dub == is_dub)
        {
            continue;
        }
        options.push(QualityOption {
            resolution,
            is_dub,
            url: doc.absolute_url(href),
            text: link.text.clone(),
        });
    }

    options
}

/// Exact match, else the smallest |r - quality|; the first listed wins ties.
fn closest<'a>(options: &[&'a QualityOption], quality: u32) -> Option<&'a QualityOption> {
    if let Some(exact) = options.iter().find(|o| o.resolution == quality) {
        return Some(exact);
    }
    let mut best: Option<&QualityOption> = None;
    for option in options {
        let distance = option.resolution.abs_diff(quality);
        match best {
            Some(current) if current.resolution.abs_diff(quality) <= distance => {}
            _ => best = Some(option),
        }
    }
    best
}

/// Pick the option for `quality` in the preferred audio variant, falling
/// back to the other variant when the preferred one has no options.
pub fn select_quality(
    options: &[QualityOption],
    quality: u32,
    prefer_dub: bool,
    page_url: &str,
) -> Result<QualityOption> {
    let preferred: Vec<&QualityOption> = options.iter().filter(|o| o.is_dub == prefer_dub).collect();
    let fallback: Vec<&QualityOption> = options.iter().filter(|o| o.is_dub != prefer_dub).collect();

    let label = |dub: bool| if dub { "dubbed" } else { "subbed" };
    debug!(
        "Available {} qualities: {:?}, {} qualities: {:?}",
        label(prefer_dub),
        preferred.iter().map(|o| o.resolution).collect::<Vec<_>>(),
        label(!prefer_dub),
        fallback.iter().map(|o| o.resolution).collect::<Vec<_>>()
    );

    let selected = if !preferred.is_empty() {
        closest(&preferred, quality)
    } else {
        if !fallback.is_empty() {
            info!(
                "No {} options, falling back to {}",
                label(prefer_dub),
                label(!prefer_dub)
            );
        }
        closest(&fallback, quality)
    };

    match selected {
        Some(option) => {
            if option.resolution != quality {
                info!(
                    "Selected closest quality: {}p ({})",
                    option.resolution,
                    label(option.is_dub)
                );
            }
            Ok(option.clone())
        }
        None => Err(PaheError::NoDownloadOptions(page_url.to_string())),
    }
}
