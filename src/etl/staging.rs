/*!
Scratch copies of the input files.

Each run works on copies of the reports, in a directory that only lives as
long as the run. A legacy file converted next to its copy goes away with it.
*/

use tempfile::TempDir;

use crate::etl::*;

pub struct StagedUploads {
    dir: TempDir,
}

impl StagedUploads {
    pub fn new() -> EtlResult<StagedUploads> {
        let dir = tempfile::Builder::new()
            .prefix("nutrietl-")
            .tempdir()
            .context(WritingFileSnafu {
                path: std::env::temp_dir().display().to_string(),
            })?;
        debug!("StagedUploads::new: {:?}", dir.path().display());
        Ok(StagedUploads { dir })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Stores the bytes of an upload under its file name. The extension is
    /// kept, since it decides how the file is read.
    pub fn stage(&self, file_name: &str, contents: &[u8]) -> EtlResult<PathBuf> {
        let name = match Path::new(file_name).file_name() {
            Some(n) => n,
            None => whatever!("Invalid upload name {:?}", file_name),
        };
        let p = self.dir.path().join(name);
        fs::write(&p, contents).context(WritingFileSnafu {
            path: p.display().to_string(),
        })?;
        debug!("stage: {:?} ({} bytes)", p.display(), contents.len());
        Ok(p)
    }

    /// Copies a file from the disk.
    pub fn stage_file(&self, source: &Path) -> EtlResult<PathBuf> {
        let name = match source.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => whatever!("Invalid input path {:?}", source.display()),
        };
        let contents = fs::read(source).context(ReadingFileSnafu {
            path: source.display().to_string(),
        })?;
        self.stage(&name, &contents)
    }

    /// Removes the directory and everything in it.
    pub fn release(self) {
        let p = self.dir.path().display().to_string();
        match self.dir.close() {
            Ok(()) => debug!("release: removed {:?}", p),
            Err(e) => warn!("Could not remove the staging directory {:?}: {}", p, e),
        }
    }
}
