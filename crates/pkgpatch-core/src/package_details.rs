use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+.*$").unwrap());
static SEQUENCE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s+]+").unwrap());

const PATCH_SUFFIX: &str = ".patch";
const DEV_PATCH_SUFFIX: &str = ".dev.patch";
const MANUAL_PATCH_SUFFIX: &str = ".manualpatch";

/// A dependency addressed by its path specifier, e.g. `left-pad`,
/// `@types/node` or `outer/@scope/inner` for a copy nested in another
/// package's `node_modules`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDetails {
    pub name: String,
    pub package_names: Vec<String>,
    /// Relative to the project root: `node_modules/outer/node_modules/inner`.
    pub path: PathBuf,
    pub path_specifier: String,
    pub human_readable_path_specifier: String,
    pub is_nested: bool,
}

impl PackageDetails {
    fn from_names(package_names: Vec<String>) -> Option<Self> {
        let name = package_names.last()?.clone();
        let mut path = PathBuf::from("node_modules");
        for (i, package) in package_names.iter().enumerate() {
            if i > 0 {
                path.push("node_modules");
            }
            path.push(package);
        }

        Some(PackageDetails {
            name,
            path,
            path_specifier: package_names.join("/"),
            human_readable_path_specifier: package_names.join(" => "),
            is_nested: package_names.len() > 1,
            package_names,
        })
    }

    /// Parses what a user types on the command line. Returns `None` for
    /// specifiers with a dangling or doubled scope.
    pub fn from_cli_specifier(specifier: &str) -> Option<Self> {
        let mut package_names = Vec::new();
        let mut scope: Option<&str> = None;

        for part in specifier.split('/').filter(|p| !p.is_empty()) {
            if part.starts_with('@') {
                if scope.is_some() {
                    return None;
                }
                scope = Some(part);
            } else if let Some(s) = scope.take() {
                package_names.push(format!("{}/{}", s, part));
            } else {
                package_names.push(part.to_string());
            }
        }
        if scope.is_some() {
            return None;
        }

        PackageDetails::from_names(package_names)
    }
}

/// One patch file of a package's series, as encoded in its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedPackageDetails {
    pub package: PackageDetails,
    pub version: String,
    /// Relative to the patch directory.
    pub patch_filename: String,
    pub sequence_number: Option<u32>,
    pub sequence_name: Option<String>,
    pub is_dev_only: bool,
}

struct NameAndVersion {
    package_name: String,
    version: Option<String>,
    sequence_number: Option<u32>,
    sequence_name: Option<String>,
}

fn parse_name_and_version(segment: &str) -> Option<NameAndVersion> {
    let parts: Vec<&str> = segment
        .split('+')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let bare = |package_name: String| NameAndVersion {
        package_name,
        version: None,
        sequence_number: None,
        sequence_name: None,
    };

    match parts.len() {
        0 => return None,
        1 => return Some(bare(parts[0].to_string())),
        _ => {}
    }

    let version_index = match parts.iter().position(|p| VERSION_RE.is_match(p)) {
        Some(i) => i,
        None => return Some(bare(format!("{}/{}", parts[0], parts[1]))),
    };

    let package_name = match &parts[..version_index] {
        [name] => name.to_string(),
        [scope, name] => format!("{}/{}", scope, name),
        _ => return None,
    };
    let version = Some(parts[version_index].to_string());

    let sequence = &parts[version_index + 1..];
    let (sequence_number, sequence_name) = match sequence {
        [] => (None, None),
        [number] => (Some(parse_sequence_number(number)?), None),
        [number, name] => (
            Some(parse_sequence_number(number)?),
            Some(name.to_string()),
        ),
        _ => return None,
    };

    Some(NameAndVersion {
        package_name,
        version,
        sequence_number,
        sequence_name,
    })
}

fn parse_sequence_number(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match raw.trim_start_matches('0') {
        "" => None,
        digits => digits.parse().ok(),
    }
}

impl PatchedPackageDetails {
    /// `patch_filename` is the path relative to the patch directory; only its
    /// last component carries the package information.
    pub fn from_patch_filename(patch_filename: &str) -> Option<Self> {
        let base = patch_filename.rsplit('/').next().unwrap_or(patch_filename);
        let is_dev_only = base.ends_with(DEV_PATCH_SUFFIX);
        let stem = base
            .strip_suffix(DEV_PATCH_SUFFIX)
            .or_else(|| base.strip_suffix(PATCH_SUFFIX))?;

        let parts: Vec<NameAndVersion> = stem
            .split("++")
            .filter_map(parse_name_and_version)
            .collect();
        let last = parts.last()?;
        let version = last.version.clone()?;
        let sequence_number = last.sequence_number;
        let sequence_name = last.sequence_name.clone();

        let package = PackageDetails::from_names(
            parts.into_iter().map(|p| p.package_name).collect(),
        )?;

        Some(PatchedPackageDetails {
            package,
            version,
            patch_filename: patch_filename.to_string(),
            sequence_number,
            sequence_name,
            is_dev_only,
        })
    }

    /// The unnumbered single-patch case sorts as position 0.
    pub fn sort_key(&self) -> u32 {
        self.sequence_number.unwrap_or(0)
    }
}

/// Whitespace and `+` would break the file name grammar.
pub fn sanitize_sequence_name(name: &str) -> Option<String> {
    let sanitized = SEQUENCE_NAME_RE.replace_all(name.trim(), "-").to_string();
    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

pub fn create_patch_file_name(
    package: &PackageDetails,
    version: &str,
    sequence_number: Option<u32>,
    sequence_name: Option<&str>,
) -> String {
    let names = package
        .package_names
        .iter()
        .map(|n| n.replace('/', "+"))
        .collect::<Vec<_>>()
        .join("++");

    let mut file_name = format!("{}+{}", names, version);
    if let Some(number) = sequence_number {
        file_name.push_str(&format!("+{:03}", number));
    }
    if let Some(name) = sequence_name.filter(|n| !n.is_empty()) {
        file_name.push('+');
        file_name.push_str(name);
    }
    file_name.push_str(PATCH_SUFFIX);
    file_name
}

pub fn create_manual_patch_file_name(package_name: &str, version: &str) -> String {
    format!(
        "{}+{}{}",
        package_name.replace('/', "+"),
        version,
        MANUAL_PATCH_SUFFIX
    )
}
