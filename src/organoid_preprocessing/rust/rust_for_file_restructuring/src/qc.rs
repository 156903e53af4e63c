//! Quality-control predicates deciding whether a well, or a directory nested
//! inside it, has a file structure complete enough to be copied.

use crate::config::ChannelMatching;
use crate::error::RestructureError;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recognized image extensions, compared case-insensitively.
#[derive(Debug, Clone)]
pub struct ImageExtensions(Vec<String>);

impl ImageExtensions {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        ImageExtensions(
            extensions
                .iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        )
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.0.iter().any(|known| known.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

impl Default for ImageExtensions {
    fn default() -> Self {
        ImageExtensions::new(&["tif", "tiff"])
    }
}

#[derive(Debug, Clone)]
struct Channel {
    token: String,
    bounded: Option<Regex>,
}

/// Assigns image file names to channels by the token they contain.
#[derive(Debug, Clone)]
pub struct ChannelMatcher {
    channels: Vec<Channel>,
}

impl ChannelMatcher {
    pub fn new<S: AsRef<str>>(
        channel_names: &[S],
        matching: ChannelMatching,
    ) -> Result<Self, RestructureError> {
        let mut seen = BTreeSet::new();
        let channels = channel_names
            .iter()
            .filter(|name| {
                let token: &str = (*name).as_ref();
                seen.insert(token.to_string())
            })
            .map(|name| -> Result<Channel, RestructureError> {
                let token = name.as_ref().to_string();
                let bounded = match matching {
                    ChannelMatching::Substring => None,
                    ChannelMatching::Delimited => Some(Regex::new(&format!(
                        r"(?:^|[^A-Za-z0-9]){}(?:[^A-Za-z0-9]|$)",
                        regex::escape(&token)
                    ))?),
                };
                Ok(Channel { token, bounded })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChannelMatcher { channels })
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.token.as_str())
    }

    /// Tokens found in `file_name`. Under substring matching a name can hit
    /// several channels at once, and each of them is counted.
    pub fn channels_in<'a>(&'a self, file_name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.channels
            .iter()
            .filter(move |c| match &c.bounded {
                Some(re) => re.is_match(file_name),
                None => file_name.contains(c.token.as_str()),
            })
            .map(|c| c.token.as_str())
    }

    /// Image counts per channel. Every configured channel is present, zero
    /// when nothing matched it.
    pub fn count<I, S>(&self, file_names: I) -> BTreeMap<String, usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: BTreeMap<String, usize> =
            self.tokens().map(|t| (t.to_string(), 0)).collect();
        for name in file_names {
            for token in self.channels_in(name.as_ref()) {
                if let Some(count) = counts.get_mut(token) {
                    *count += 1;
                }
            }
        }
        counts
    }
}

/// Everything the QC predicates and the copy step need to know.
#[derive(Debug, Clone)]
pub struct QcRules {
    pub channels: ChannelMatcher,
    pub extensions: ImageExtensions,
    /// File names containing this marker are never copied.
    pub exclude_marker: String,
}

/// True iff `well_dir` has at least one subdirectory and every subdirectory
/// holds a directory named exactly like the well.
pub fn has_consistent_naming(well_dir: &Path) -> Result<bool, RestructureError> {
    let well_name = match well_dir.file_name() {
        Some(name) => name.to_os_string(),
        None => return Ok(false),
    };

    let sub_dirs = child_dirs(well_dir)?;
    if sub_dirs.is_empty() {
        return Ok(false);
    }

    for sub in &sub_dirs {
        let nested = child_dirs(sub)?;
        if !nested.iter().any(|d| d.file_name() == Some(well_name.as_os_str())) {
            return Ok(false);
        }
    }

    Ok(true)
}

/// True iff no file anywhere below `nested_dir` has a recognized image extension.
pub fn is_image_folder_empty(
    nested_dir: &Path,
    extensions: &ImageExtensions,
) -> Result<bool, RestructureError> {
    Ok(image_files(nested_dir, extensions)?.is_empty())
}

/// True iff every channel has the same, nonzero number of images below `nested_dir`.
pub fn has_equal_images_per_channel(
    nested_dir: &Path,
    channels: &ChannelMatcher,
    extensions: &ImageExtensions,
) -> Result<bool, RestructureError> {
    let counts = channel_counts(nested_dir, channels, extensions)?;
    Ok(counts_are_balanced(&counts))
}

pub fn channel_counts(
    nested_dir: &Path,
    channels: &ChannelMatcher,
    extensions: &ImageExtensions,
) -> Result<BTreeMap<String, usize>, RestructureError> {
    let files = image_files(nested_dir, extensions)?;
    let names = files
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned());
    Ok(channels.count(names))
}

/// Exactly one distinct count, and it is not zero.
pub fn counts_are_balanced(counts: &BTreeMap<String, usize>) -> bool {
    let distinct: BTreeSet<usize> = counts.values().copied().collect();
    distinct.len() == 1 && !distinct.contains(&0)
}

/// Recursive list of image files below `dir`, in walk order. Symbolic links
/// are followed, so a linked image or directory counts like the real one.
pub fn image_files(
    dir: &Path,
    extensions: &ImageExtensions,
) -> Result<Vec<PathBuf>, RestructureError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(true)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.path().is_file() && extensions.matches(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Immediate subdirectories of `dir`, sorted by name.
pub fn child_dirs(dir: &Path) -> Result<Vec<PathBuf>, RestructureError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| RestructureError::io(dir, e))? {
        let entry = entry.map_err(|e| RestructureError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, File};
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            create_dir_all(parent).unwrap();
        }
        File::create(path).unwrap();
    }

    fn substring_matcher(names: &[&str]) -> ChannelMatcher {
        ChannelMatcher::new(names, ChannelMatching::Substring).unwrap()
    }

    fn counts(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn well_without_subdirectories_is_inconsistent() {
        let root = tempdir().unwrap();
        let well = root.path().join("A01");
        create_dir_all(&well).unwrap();
        touch(&well.join("stray.tif"));

        assert!(!has_consistent_naming(&well).unwrap());
    }

    #[test]
    fn every_field_must_hold_a_dir_named_after_the_well() {
        let root = tempdir().unwrap();
        let well = root.path().join("A01");
        create_dir_all(well.join("Field_1/A01")).unwrap();
        create_dir_all(well.join("Field_2/A01")).unwrap();
        assert!(has_consistent_naming(&well).unwrap());

        create_dir_all(well.join("Field_3/B02")).unwrap();
        assert!(!has_consistent_naming(&well).unwrap());
    }

    #[test]
    fn a_file_named_like_the_well_does_not_count() {
        let root = tempdir().unwrap();
        let well = root.path().join("C03");
        create_dir_all(well.join("Field_1")).unwrap();
        touch(&well.join("Field_1/C03"));

        assert!(!has_consistent_naming(&well).unwrap());
    }

    #[test]
    fn extra_siblings_next_to_the_well_dir_are_fine() {
        let root = tempdir().unwrap();
        let well = root.path().join("A01");
        create_dir_all(well.join("Field_1/A01")).unwrap();
        create_dir_all(well.join("Field_1/Thumbnails")).unwrap();

        assert!(has_consistent_naming(&well).unwrap());
    }

    #[test]
    fn image_folder_emptiness_flips_with_one_image() {
        let root = tempdir().unwrap();
        let nested = root.path().join("Field_1");
        touch(&nested.join("A01/notes.txt"));
        create_dir_all(nested.join("A01/deeper")).unwrap();
        let extensions = ImageExtensions::default();

        assert!(is_image_folder_empty(&nested, &extensions).unwrap());

        touch(&nested.join("A01/deeper/A01_405.TIFF"));
        assert!(!is_image_folder_empty(&nested, &extensions).unwrap());
    }

    #[test]
    fn extensions_accept_leading_dots_and_any_case() {
        let extensions = ImageExtensions::new(&[".TIF", "tiff"]);
        assert!(extensions.matches(Path::new("a/b.tif")));
        assert!(extensions.matches(Path::new("a/b.Tiff")));
        assert!(!extensions.matches(Path::new("a/b.png")));
        assert!(!extensions.matches(Path::new("a/tif")));
    }

    #[test]
    fn balanced_counts() {
        assert!(counts_are_balanced(&counts(&[("405", 3), ("488", 3), ("555", 3)])));
        assert!(!counts_are_balanced(&counts(&[("405", 3), ("488", 2)])));
        assert!(!counts_are_balanced(&counts(&[("405", 0)])));
        assert!(!counts_are_balanced(&counts(&[])));
    }

    #[test]
    fn equal_images_per_channel_on_disk() {
        let root = tempdir().unwrap();
        let nested = root.path().join("Field_1");
        for z in 1..=3 {
            for channel in ["405", "488", "555"] {
                touch(&nested.join(format!("A01/A01_z{}_{}.tif", z, channel)));
            }
        }
        let extensions = ImageExtensions::default();
        let channels = substring_matcher(&["405", "488", "555"]);

        assert!(has_equal_images_per_channel(&nested, &channels, &extensions).unwrap());

        std::fs::remove_file(nested.join("A01/A01_z3_488.tif")).unwrap();
        assert!(!has_equal_images_per_channel(&nested, &channels, &extensions).unwrap());
    }

    #[test]
    fn channel_absent_from_disk_breaks_balance() {
        let root = tempdir().unwrap();
        let nested = root.path().join("Field_1");
        touch(&nested.join("A01/A01_405.tif"));
        touch(&nested.join("A01/A01_488.tif"));
        let channels = substring_matcher(&["405", "488", "640"]);

        assert!(!has_equal_images_per_channel(&nested, &channels, &ImageExtensions::default()).unwrap());
    }

    #[test]
    fn non_image_files_are_not_counted() {
        let channels = substring_matcher(&["405"]);
        let root = tempdir().unwrap();
        touch(&root.path().join("A01_405.tif"));
        touch(&root.path().join("A01_405.csv"));

        let counted = channel_counts(root.path(), &channels, &ImageExtensions::default()).unwrap();
        assert_eq!(counted, counts(&[("405", 1)]));
    }

    #[test]
    fn substring_matching_counts_a_name_for_every_token_it_contains() {
        let channels = substring_matcher(&["405", "488"]);
        let counted = channels.count(["A01_405_t488.tif", "A01_488.tif"]);
        assert_eq!(counted, counts(&[("405", 1), ("488", 2)]));
    }

    #[test]
    fn delimited_matching_requires_token_boundaries() {
        let channels = ChannelMatcher::new(&["405", "488"], ChannelMatching::Delimited).unwrap();
        let counted = channels.count(["A01_405_t4889.tif", "A01-488.tif", "488_A01.tif"]);
        assert_eq!(counted, counts(&[("405", 1), ("488", 2)]));
    }

    #[test]
    fn repeated_channel_names_count_once() {
        let channels = substring_matcher(&["405", "488", "405"]);
        assert_eq!(channels.tokens().collect::<Vec<_>>(), vec!["405", "488"]);

        let counted = channels.count(["A01_405.tif", "A01_488.tif"]);
        assert_eq!(counted, counts(&[("405", 1), ("488", 1)]));
        assert!(counts_are_balanced(&counted));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_images_and_dirs_are_listed() {
        use std::os::unix::fs::symlink;

        let root = tempdir().unwrap();
        let real = root.path().join("real");
        touch(&real.join("A01/A01_405.tif"));
        touch(&real.join("A01_488.tif"));
        let nested = root.path().join("Field_1");
        create_dir_all(&nested).unwrap();
        symlink(real.join("A01"), nested.join("A01")).unwrap();
        symlink(real.join("A01_488.tif"), nested.join("A01_488.tif")).unwrap();

        let listed: Vec<PathBuf> = image_files(&nested, &ImageExtensions::default())
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(&nested).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            listed,
            vec![PathBuf::from("A01/A01_405.tif"), PathBuf::from("A01_488.tif")]
        );
    }

    #[test]
    fn delimited_tokens_are_escaped() {
        let channels = ChannelMatcher::new(&["a.b"], ChannelMatching::Delimited).unwrap();
        assert_eq!(channels.channels_in("x_a.b_y.tif").count(), 1);
        assert_eq!(channels.channels_in("x_aXb_y.tif").count(), 0);
    }
}
