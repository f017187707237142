//! Output sink: the rendered call tree's destination. A `Box<dyn Write>` so
//! the interpreter doesn't care whether it's writing to stdout, a file
//! opened for append, or (in tests) an in-memory buffer.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

pub fn stdout() -> Box<dyn Write + Send> {
    Box::new(io::stdout())
}

pub fn file(path: &Path, append: bool) -> io::Result<Box<dyn Write + Send>> {
    let f = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    Ok(Box::new(f))
}
