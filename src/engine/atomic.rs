use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tempfile::NamedTempFile;

use crate::Result;

/// A file write that only becomes visible at its destination on [`commit`](AtomicFile::commit).
///
/// Content is streamed into a uniquely named temporary file next to the
/// destination (`.<name>.<random>.tmp`). Committing flushes and fsyncs the
/// temporary file, then renames it over the destination in one step. Dropping
/// an uncommitted `AtomicFile` deletes the temporary file and leaves the
/// destination untouched.
pub struct AtomicFile {
    target: PathBuf,
    writer: BufWriter<NamedTempFile>,
}

impl AtomicFile {
    /// Opens a temporary file in the same directory as `target`.
    ///
    /// The directory must already exist. An existing `target` lends its
    /// permissions to the replacement.
    pub fn create<P: AsRef<Path>>(target: P) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        // The temp file starts out 0600; keep the mode of the file being replaced.
        match fs::metadata(&target) {
            Ok(meta) => temp.as_file().set_permissions(meta.permissions())?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            target,
            writer: BufWriter::new(temp),
        })
    }

    /// Location of the temporary file backing this write.
    pub fn temp_path(&self) -> &Path {
        self.writer.get_ref().path()
    }

    /// Makes the written content visible at the destination.
    pub fn commit(self) -> Result<()> {
        let temp = self.writer.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.target).map_err(|e| e.error)?;
        Ok(())
    }

    /// Throws the written content away.
    pub fn discard(self) {}
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Atomically replaces `path` with `value` serialized as JSON.
///
/// `indent` is the number of spaces per nesting level; `0` writes compact JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, indent: usize) -> Result<()> {
    let mut file = AtomicFile::create(path)?;
    if indent == 0 {
        serde_json::to_writer(&mut file, value)?;
    } else {
        let indent = " ".repeat(indent);
        let mut ser = Serializer::with_formatter(&mut file, PrettyFormatter::with_indent(indent.as_bytes()));
        value.serialize(&mut ser)?;
    }
    file.write_all(b"\n")?;
    file.commit()
}
