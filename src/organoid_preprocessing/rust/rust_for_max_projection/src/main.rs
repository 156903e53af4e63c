// src/main.rs
mod stack;

use anyhow::{anyhow, Context, Result};
use env_logger::{Builder, Env};
use glob::{glob_with, MatchOptions, Pattern};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use stack::{read_stack, write_projection};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "zmax_projection",
    about = "Maximum-intensity projection of every z-stack of a patient"
)]
struct Opt {
    /// Patient ID, e.g. NF0014
    #[structopt(long = "patient")]
    patient: String,

    /// Root holding one directory per patient
    #[structopt(long = "data-dir", parse(from_os_str), default_value = "../../data")]
    data_dir: PathBuf,
}

const TIFF_EXTENSIONS: [&str; 2] = ["tif", "tiff"];

fn main() -> Result<()> {
    let start_time = Instant::now();

    // Initialize env_logger
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let opt = Opt::from_args();

    let (images_dir, output_dir) = patient_dirs(&opt.data_dir, &opt.patient)?;
    info!("Patient: {}", opt.patient);
    info!("Input dir: {:?}", images_dir);
    info!("Output dir: {:?}", output_dir);

    let written = project_all(&images_dir, &output_dir)?;

    let elapsed = start_time.elapsed();
    info!(
        "All done! {} projections written in {:.2} seconds",
        written,
        elapsed.as_secs_f64()
    );
    Ok(())
}

/// `<data>/<patient>/zstack_images` (must exist) and `<data>/<patient>/zmax_proj`.
fn patient_dirs(data_dir: &Path, patient: &str) -> Result<(PathBuf, PathBuf)> {
    let patient_dir = data_dir.join(patient);
    let images_dir = patient_dir.join("zstack_images");
    let images_dir = images_dir
        .canonicalize()
        .with_context(|| format!("Input directory does not exist: {:?}", images_dir))?;
    Ok((images_dir, patient_dir.join("zmax_proj")))
}

/// All TIFF files below `dir`, sorted by path.
fn find_tiff_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let root = dir
        .to_str()
        .ok_or_else(|| anyhow!("Input directory is not valid UTF-8: {:?}", dir))?;
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    let mut files = Vec::new();
    for ext in TIFF_EXTENSIONS {
        let pattern = format!("{}/**/*.{}", Pattern::escape(root), ext);
        info!("Searching for TIFF files with pattern: {}", pattern);
        for entry in glob_with(&pattern, options)? {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!("Bad path from glob: {:?}", e),
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// `<output>/<name of the stack's parent dir>/<stack file name>`
fn output_path(output_dir: &Path, tiff_file: &Path) -> Result<PathBuf> {
    let file_name = tiff_file
        .file_name()
        .ok_or_else(|| anyhow!("No file name in {:?}", tiff_file))?;
    let parent_name = tiff_file
        .parent()
        .and_then(|p| p.file_name())
        .ok_or_else(|| anyhow!("No parent directory for {:?}", tiff_file))?;
    Ok(output_dir.join(parent_name).join(file_name))
}

/// Projects every stack under `images_dir`. The first unreadable stack aborts the run.
fn project_all(images_dir: &Path, output_dir: &Path) -> Result<usize> {
    let tiff_files = find_tiff_files(images_dir)?;
    info!("Found {} TIFF files", tiff_files.len());
    if tiff_files.is_empty() {
        warn!("No TIFF files found in {:?}", images_dir);
        return Ok(0);
    }

    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("#>-");
    let pb = ProgressBar::new(tiff_files.len() as u64);
    pb.set_style(style);
    pb.set_message("Projecting z-stacks...");

    for tiff_file in &tiff_files {
        let stack = read_stack(tiff_file)?;
        debug!("{:?}: stack shape {:?}", tiff_file, stack.shape());
        let projection = stack
            .max_project()
            .with_context(|| format!("Failed to project {:?}", tiff_file))?;

        let out = output_path(output_dir, tiff_file)?;
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        write_projection(&out, &projection)?;
        pb.inc(1);
    }

    pb.finish_with_message("All z-stacks projected");
    Ok(tiff_files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use tempfile::tempdir;
    use tiff::encoder::{colortype, TiffEncoder};

    fn write_stack_u8(path: &Path, width: u32, height: u32, pages: &[Vec<u8>]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut writer = BufWriter::new(File::create(path).unwrap());
        let mut encoder = TiffEncoder::new(&mut writer).unwrap();
        for page in pages {
            encoder.write_image::<colortype::Gray8>(width, height, page).unwrap();
        }
        drop(encoder);
        writer.flush().unwrap();
    }

    #[test]
    fn output_mirrors_the_immediate_parent() {
        let out = output_path(
            Path::new("/data/NF0014/zmax_proj"),
            Path::new("/data/NF0014/zstack_images/C4-2/C4-2_405.tif"),
        )
        .unwrap();
        assert_eq!(out, PathBuf::from("/data/NF0014/zmax_proj/C4-2/C4-2_405.tif"));
    }

    #[test]
    fn missing_input_directory_is_fatal() {
        let data = tempdir().unwrap();
        assert!(patient_dirs(data.path(), "NF0014").is_err());

        fs::create_dir_all(data.path().join("NF0014/zstack_images")).unwrap();
        let (input, output) = patient_dirs(data.path(), "NF0014").unwrap();
        assert!(input.ends_with("NF0014/zstack_images"));
        assert!(output.ends_with("NF0014/zmax_proj"));
    }

    #[test]
    fn tiff_discovery_is_recursive_sorted_and_case_insensitive() {
        let dir = tempdir().unwrap();
        for name in ["b/B2.tif", "a/A1.TIF", "a/deeper/A0.tiff", "a/notes.txt"] {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            File::create(path).unwrap();
        }

        let found: Vec<PathBuf> = find_tiff_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            found,
            vec![
                PathBuf::from("a/A1.TIF"),
                PathBuf::from("a/deeper/A0.tiff"),
                PathBuf::from("b/B2.tif"),
            ]
        );
    }

    #[test]
    fn projects_every_stack_into_the_mirrored_tree() {
        let data = tempdir().unwrap();
        let (input, output) = {
            fs::create_dir_all(data.path().join("NF0014/zstack_images")).unwrap();
            patient_dirs(data.path(), "NF0014").unwrap()
        };
        write_stack_u8(
            &input.join("C4-2/C4-2_405.tif"),
            2,
            2,
            &[vec![1, 2, 3, 4], vec![4, 3, 2, 1]],
        );
        write_stack_u8(&input.join("D5-1/D5-1_488.tif"), 2, 1, &[vec![7, 9]]);

        assert_eq!(project_all(&input, &output).unwrap(), 2);

        let first = read_stack(&output.join("C4-2/C4-2_405.tif")).unwrap();
        assert_eq!(first.shape(), (1, 2, 2));
        assert_eq!(
            first,
            stack::Stack::U8(ndarray::Array3::from_shape_vec((1, 2, 2), vec![4, 3, 3, 4]).unwrap())
        );

        let second = read_stack(&output.join("D5-1/D5-1_488.tif")).unwrap();
        assert_eq!(
            second,
            stack::Stack::U8(ndarray::Array3::from_shape_vec((1, 1, 2), vec![7, 9]).unwrap())
        );
    }

    #[test]
    fn broken_stack_aborts_the_run() {
        let data = tempdir().unwrap();
        let input = data.path().join("zstack_images");
        write_stack_u8(&input.join("A/good.tif"), 1, 1, &[vec![1]]);
        fs::write(input.join("A/zz_bad.tif"), b"not a tiff").unwrap();

        assert!(project_all(&input, &data.path().join("zmax_proj")).is_err());
    }
}
