//! Build outputs: system description, config data files, patched
//! binaries, topology graph.

use crate::build::BuildArtifacts;
use crate::{dot, BuildError};
use fw_abi::CONFIG_SECTION;
use fw_layout::elf::patch_section;
use std::fs;
use std::path::Path;

fn write(path: &Path, bytes: &[u8]) -> Result<(), BuildError> {
    fs::write(path, bytes).map_err(|source| BuildError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Write every artifact of a finished build into `out_dir`.
///
/// For each component this produces `<name>.data` (the raw config bytes)
/// and `<name>.elf` (a copy of the component's binary from `build_dir`
/// with the config patched into its dedicated section). A missing binary
/// or config section aborts the emit; nothing is partially usable.
pub fn emit(
    artifacts: &BuildArtifacts,
    build_dir: &Path,
    out_dir: &Path,
) -> Result<(), BuildError> {
    fs::create_dir_all(out_dir).map_err(|source| BuildError::Io {
        path: out_dir.display().to_string(),
        source,
    })?;

    write(
        &out_dir.join("firewall.system"),
        artifacts.system.to_xml().as_bytes(),
    )?;
    write(
        &out_dir.join("firewall.dot"),
        dot::render(&artifacts.system, &artifacts.log).as_bytes(),
    )?;

    for packed in &artifacts.packed {
        write(
            &out_dir.join(format!("{}.data", packed.component)),
            &packed.bytes,
        )?;

        let image_path = build_dir.join(&packed.image);
        let mut image = fs::read(&image_path).map_err(|source| BuildError::Io {
            path: image_path.display().to_string(),
            source,
        })?;
        patch_section(&mut image, CONFIG_SECTION, &packed.bytes).map_err(|source| {
            BuildError::Patch {
                binary: packed.image.clone(),
                source,
            }
        })?;
        write(&out_dir.join(format!("{}.elf", packed.component)), &image)?;
        log::info!(
            "patched {} ({} config bytes) -> {}.elf",
            packed.image,
            packed.bytes.len(),
            packed.component
        );
    }
    Ok(())
}
