//! Source resolution for isofetch
//!
//! Maps catalog identifiers such as `ubuntu/24.10-server` to ordered mirror
//! lists, and derives output file names and cache tags.

use strsim::{jaro_winkler, normalized_levenshtein};

use crate::core::error::{Error, Result};

const UBUNTU_MIRRORS: &[&str] = &[
    "https://mirrors.ustc.edu.cn/ubuntu-releases",
    "https://mirrors.tuna.tsinghua.edu.cn/ubuntu-releases",
    "https://repo.huaweicloud.com/ubuntu-releases",
    "https://releases.ubuntu.com",
];

/// (release directory, point release)
const UBUNTU_RELEASES: &[(&str, &str)] = &[
    ("22.04", "22.04.5"),
    ("24.10", "24.10"),
    ("25.04", "25.04"),
];

const VIRTIO_URLS: &[&str] = &[
    "https://dl.istoreos.com/iStoreOS/Virtual/virtio-win-0.1.271.iso",
    "https://fw0.koolcenter.com/iStoreOS/Virtual/virtio-win-0.1.271.iso",
    "https://fedorapeople.org/groups/virt/virtio-win/direct-downloads/archive-virtio/virtio-win-0.1.271-1/virtio-win-0.1.271.iso",
];

const ISTOREOS_MIRRORS: &[&str] = &["https://dl.istoreos.com", "https://fw0.koolcenter.com"];

/// (series, directory, build)
const ISTOREOS_RELEASES: &[(&str, &str, &str)] = &[
    ("24.10", "iStoreOS", "24.10.1-2025052311"),
    ("22.03", "iStoreOS-22.03", "22.03.7-2025051615"),
];

/// A resolved download target
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    /// Mirror URLs in preference order
    pub mirrors: Vec<String>,

    /// File name the finished download is saved under
    pub file_name: String,

    /// Key for the remote-URL cache
    pub tag: String,
}

/// Resolves a catalog identifier or a raw `http(s)://` URL
pub fn resolve_source(source: &str) -> Result<SourceEntry> {
    let source = source.trim();
    if source.starts_with("http://") || source.starts_with("https://") {
        return Ok(SourceEntry {
            mirrors: vec![source.to_string()],
            file_name: resolve_output_filename(source),
            tag: clean_tag(&resolve_output_filename(source)),
        });
    }

    let lower = source.to_lowercase();
    let (family, version) = match lower.split_once('/') {
        Some((family, version)) => (family, Some(version)),
        None => (lower.as_str(), None),
    };

    let entry = match family {
        "ubuntu" => ubuntu(version.unwrap_or("24.10-desktop")),
        "virtio" if version.is_none() => Some(virtio()),
        "istoreos" => istoreos(version.unwrap_or("24.10")),
        _ => None,
    };

    entry.ok_or_else(|| unknown_source(source))
}

fn ubuntu(version: &str) -> Option<SourceEntry> {
    let (release, flavor) = match version.split_once('-') {
        Some((release, "desktop")) => (release, "desktop"),
        Some((release, "server" | "live-server")) => (release, "live-server"),
        Some(_) => return None,
        None => (version, "desktop"),
    };
    let (dir, point) = UBUNTU_RELEASES.iter().find(|(dir, _)| *dir == release)?;

    let file_name = format!("ubuntu-{point}-{flavor}-amd64.iso");
    Some(SourceEntry {
        mirrors: UBUNTU_MIRRORS
            .iter()
            .map(|base| format!("{base}/{dir}/{file_name}"))
            .collect(),
        tag: clean_tag(&format!("ubuntu {dir} {flavor}")),
        file_name,
    })
}

fn virtio() -> SourceEntry {
    SourceEntry {
        mirrors: VIRTIO_URLS.iter().map(|u| u.to_string()).collect(),
        file_name: resolve_output_filename(VIRTIO_URLS[0]),
        tag: "virtio-win".to_string(),
    }
}

fn istoreos(version: &str) -> Option<SourceEntry> {
    let (series, dir, build) = ISTOREOS_RELEASES
        .iter()
        .find(|(series, _, _)| *series == version)?;

    let file_name = format!("istoreos-{build}-x86-64-squashfs-combined-efi.img.gz");
    Some(SourceEntry {
        mirrors: ISTOREOS_MIRRORS
            .iter()
            .map(|base| format!("{base}/{dir}/x86_64_efi/{file_name}"))
            .collect(),
        tag: clean_tag(&format!("istoreos {series}")),
        file_name,
    })
}

/// Every catalog identifier, in display order
pub fn known_sources() -> Vec<String> {
    let mut ids = Vec::new();
    for (dir, _) in UBUNTU_RELEASES {
        ids.push(format!("ubuntu/{dir}-desktop"));
        ids.push(format!("ubuntu/{dir}-server"));
    }
    ids.push("virtio".to_string());
    for (series, _, _) in ISTOREOS_RELEASES {
        ids.push(format!("istoreos/{series}"));
    }
    ids
}

fn unknown_source(source: &str) -> Error {
    match suggest_correction(source) {
        Some(suggestion) => Error::InvalidInput(format!(
            "Unknown source '{source}'. Did you mean '{suggestion}'?"
        )),
        None => Error::InvalidInput(format!(
            "Unknown source '{source}'. Known sources: {}",
            known_sources().join(", ")
        )),
    }
}

/// Closest catalog identifier to a misspelled one
pub fn suggest_correction(source: &str) -> Option<String> {
    let input = source.to_lowercase();
    let mut best: Option<(f64, String)> = None;

    for candidate in known_sources() {
        let score = 0.6 * jaro_winkler(&input, &candidate)
            + 0.4 * normalized_levenshtein(&input, &candidate);
        if score >= 0.75 && best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, candidate));
        }
    }

    best.map(|(_, candidate)| candidate)
}

/// Generates output filename from the last path segment of a URL
pub fn resolve_output_filename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && !name.contains(':') => name.to_string(),
        _ => "download.bin".to_string(),
    }
}

/// Normalises a free-form name into a cache tag: letters and digits are
/// kept, whitespace and underscores become `-`, everything else is dropped.
pub fn clean_tag(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            c if c.is_alphanumeric() || c == '-' => Some(c),
            c if c.is_whitespace() || c == '_' => Some('-'),
            _ => None,
        })
        .collect::<String>()
        .to_lowercase()
}
