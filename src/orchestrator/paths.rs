//! Output layout: `<output_dir>/<title>/<title> - Episode <n>.mp4`.

use std::path::{Path, PathBuf};

const FORBIDDEN: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Drop characters that are unsafe in file names on common platforms.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title.chars().filter(|c| !FORBIDDEN.contains(c)).collect();
    let trimmed = cleaned.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn anime_dir(output_dir: &Path, title: &str) -> PathBuf {
    output_dir.join(sanitize_title(title))
}

pub fn episode_path(output_dir: &Path, title: &str, episode: u32) -> PathBuf {
    let name = sanitize_title(title);
    output_dir
        .join(&name)
        .join(format!("{name} - Episode {episode}.mp4"))
}

/// Whether a previous run already produced this file.
pub fn is_present(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("Re:Zero"), "ReZero");
        assert_eq!(sanitize_title("Fate/Zero"), "FateZero");
        assert_eq!(sanitize_title(r#"What? "Why" <Now>|*\"#), "What Why Now");
        assert_eq!(sanitize_title("???"), "untitled");
    }

    #[test]
    fn test_episode_path_layout() {
        let path = episode_path(Path::new("downloads"), "Steins;Gate: 0", 7);
        assert_eq!(
            path,
            PathBuf::from("downloads/Steins;Gate 0/Steins;Gate 0 - Episode 7.mp4")
        );
    }

    #[test]
    fn test_is_present_requires_content() {
        let tmp = tempfile::tempdir().unwrap();
        let empty = tmp.path().join("a.mp4");
        let full = tmp.path().join("b.mp4");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"x").unwrap();

        assert!(!is_present(&empty));
        assert!(is_present(&full));
        assert!(!is_present(&tmp.path().join("missing.mp4")));
    }
}
