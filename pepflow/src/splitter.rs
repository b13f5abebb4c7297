//! Partitioning of MGF spectra files into bounded chunk files.
//!
//! A record ends at each line containing `END IONS`. Every chunk holds
//! `spectra_count` records except the last, and concatenating the chunk
//! files in index order reproduces the input byte for byte.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::PipelineError;

pub const RECORD_END_MARKER: &[u8] = b"END IONS";

/// One chunk file written by [`split`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkFile {
    pub index: usize,
    pub path: PathBuf,
    pub bytes: u64,
    pub records: usize,
}

impl ChunkFile {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }
}

/// `{stem}-{index:08}.mgf`.
pub fn chunk_file_name(stem: &str, index: usize) -> String {
    format!("{stem}-{index:08}.mgf")
}

/// Input file name up to its first `.`.
pub fn input_stem(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

fn is_record_end(line: &[u8]) -> bool {
    line.windows(RECORD_END_MARKER.len())
        .any(|window| window == RECORD_END_MARKER)
}

struct Buffered {
    text: Vec<u8>,
    records: usize,
}

struct ChunkWriter<'a> {
    out_dir: &'a Path,
    stem: &'a str,
    written: Vec<ChunkFile>,
}

impl ChunkWriter<'_> {
    async fn write(&mut self, chunk: Buffered) -> anyhow::Result<()> {
        let index = self.written.len();
        let path = self.out_dir.join(chunk_file_name(self.stem, index));
        let mut file = File::create(&path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;
        file.write_all(&chunk.text).await?;
        file.flush().await?;
        self.written.push(ChunkFile {
            index,
            path,
            bytes: chunk.text.len() as u64,
            records: chunk.records,
        });
        Ok(())
    }
}

/// Splits `reader` into chunk files of `spectra_count` records under
/// `out_dir`.
///
/// Trailing bytes after the last record marker join the final chunk rather
/// than forming one of their own. An input without any marker, including an
/// empty one, yields exactly one chunk.
pub async fn split<R>(
    reader: R,
    out_dir: &Path,
    stem: &str,
    spectra_count: u32,
) -> anyhow::Result<Vec<ChunkFile>>
where
    R: AsyncBufRead + Unpin,
{
    if spectra_count == 0 {
        return Err(PipelineError::Validation {
            field: "spectra_count",
            reason: "must be greater than zero",
        }
        .into());
    }
    let target = spectra_count as usize;
    let mut writer = ChunkWriter {
        out_dir,
        stem,
        written: Vec::new(),
    };

    // A completed chunk is held back until the next one completes so that a
    // marker-free tail can still be appended to it.
    let mut held: Option<Buffered> = None;
    let mut current = Buffered {
        text: Vec::new(),
        records: 0,
    };
    let mut reader = reader;
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        current.text.extend_from_slice(&line);
        if is_record_end(&line) {
            current.records += 1;
        }
        if current.records == target {
            let complete = std::mem::replace(
                &mut current,
                Buffered {
                    text: Vec::new(),
                    records: 0,
                },
            );
            if let Some(previous) = held.replace(complete) {
                writer.write(previous).await?;
            }
        }
    }

    match held {
        Some(mut last) if current.records == 0 => {
            last.text.extend_from_slice(&current.text);
            writer.write(last).await?;
        }
        Some(last) => {
            writer.write(last).await?;
            writer.write(current).await?;
        }
        None => writer.write(current).await?,
    }

    Ok(writer.written)
}

/// Splits the file at `input` into `out_dir`, naming chunks after the input.
pub async fn split_file(
    input: &Path,
    out_dir: &Path,
    spectra_count: u32,
) -> anyhow::Result<Vec<ChunkFile>> {
    let file = File::open(input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    let file_name = input
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("input");
    tokio::fs::create_dir_all(out_dir).await?;
    split(BufReader::new(file), out_dir, input_stem(file_name), spectra_count).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgf(records: usize) -> String {
        let mut text = String::new();
        for i in 0..records {
            text.push_str(&format!(
                "BEGIN IONS\nTITLE=spectrum {i}\nPEPMASS=500.{i}\n100.0 1.0\nEND IONS\n"
            ));
        }
        text
    }

    async fn split_str(input: &str, k: u32) -> (tempfile::TempDir, Vec<ChunkFile>) {
        let dir = tempfile::tempdir().unwrap();
        let chunks = split(input.as_bytes(), dir.path(), "run", k).await.unwrap();
        (dir, chunks)
    }

    async fn concatenated(chunks: &[ChunkFile]) -> Vec<u8> {
        let mut all = Vec::new();
        for chunk in chunks {
            all.extend(tokio::fs::read(&chunk.path).await.unwrap());
        }
        all
    }

    #[tokio::test]
    async fn five_records_by_two_make_three_chunks() {
        let input = mgf(5);
        let (_dir, chunks) = split_str(&input, 2).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.records).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert_eq!(chunks[0].file_name(), "run-00000000.mgf");
        assert_eq!(chunks[2].file_name(), "run-00000002.mgf");
        assert_eq!(concatenated(&chunks).await, input.as_bytes());
    }

    #[tokio::test]
    async fn exact_multiple_has_no_empty_tail() {
        let input = mgf(4);
        let (_dir, chunks) = split_str(&input, 2).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(concatenated(&chunks).await, input.as_bytes());
    }

    #[tokio::test]
    async fn trailing_bytes_join_last_chunk() {
        let input = format!("{}\n\n# trailer", mgf(4));
        let (_dir, chunks) = split_str(&input, 2).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].records, 2);
        assert_eq!(concatenated(&chunks).await, input.as_bytes());
    }

    #[tokio::test]
    async fn markerless_input_is_one_chunk() {
        let input = "BEGIN IONS\nTITLE=unterminated\n";
        let (_dir, chunks) = split_str(input, 3).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].records, 0);
        assert_eq!(concatenated(&chunks).await, input.as_bytes());
    }

    #[tokio::test]
    async fn empty_input_is_one_empty_chunk() {
        let (_dir, chunks) = split_str("", 3).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].bytes, 0);
    }

    #[tokio::test]
    async fn chunk_count_is_ceiling_of_records_over_target() {
        for (records, k) in [(1, 1), (7, 3), (10, 10), (11, 10), (3, 200)] {
            let input = mgf(records);
            let (_dir, chunks) = split_str(&input, k).await;
            assert_eq!(chunks.len(), records.div_ceil(k as usize), "{records}/{k}");
            assert_eq!(chunks.iter().map(|c| c.records).sum::<usize>(), records);
            assert_eq!(concatenated(&chunks).await, input.as_bytes());
        }
    }

    #[tokio::test]
    async fn crlf_and_missing_final_newline_are_preserved() {
        let input = "BEGIN IONS\r\nEND IONS\r\nBEGIN IONS\r\nEND IONS";
        let (_dir, chunks) = split_str(input, 1).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(concatenated(&chunks).await, input.as_bytes());
    }

    #[tokio::test]
    async fn zero_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(split(mgf(1).as_bytes(), dir.path(), "run", 0).await.is_err());
    }

    #[tokio::test]
    async fn split_file_names_chunks_after_input_stem() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("liver.run1.mgf");
        tokio::fs::write(&input, mgf(3)).await.unwrap();
        let chunks = split_file(&input, &dir.path().join("mgfs"), 2).await.unwrap();
        assert_eq!(chunks[0].file_name(), "liver-00000000.mgf");
        assert_eq!(chunks.len(), 2);
    }
}
