//! On-disk binary codec for the DiskANN-style graph (§6): append-only
//! little-endian records, with a sidecar `id -> offset` index rebuilt by a
//! full scan on open. The format carries no magic header, as specified.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use rustc_hash::FxHashMap;

/// One on-disk node record: its neighbor list, PQ code, and an optional
/// pointer into a sidecar full-precision vector file.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskRecord {
    pub id: u64,
    pub neighbors: Vec<u64>,
    pub pq_code: Vec<u8>,
    /// Byte offset into a vector file, or -1 if unused.
    pub vector_offset: i64,
}

/// Appends `records` to `path`, creating it if absent.
pub fn write_node_file(path: &Path, records: &[DiskRecord]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    for record in records {
        write_record(&mut w, record)?;
    }
    w.flush()
}

fn write_record<W: Write>(w: &mut W, record: &DiskRecord) -> io::Result<()> {
    w.write_all(&record.id.to_le_bytes())?;
    w.write_all(&(record.neighbors.len() as u32).to_le_bytes())?;
    for n in &record.neighbors {
        w.write_all(&n.to_le_bytes())?;
    }
    w.write_all(&(record.pq_code.len() as u32).to_le_bytes())?;
    w.write_all(&record.pq_code)?;
    w.write_all(&record.vector_offset.to_le_bytes())?;
    Ok(())
}

fn read_record<R: Read>(r: &mut R) -> io::Result<Option<DiskRecord>> {
    let mut id_buf = [0u8; 8];
    match r.read(&mut id_buf)? {
        0 => return Ok(None),
        8 => {}
        _ => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated record id")),
    }
    let id = u64::from_le_bytes(id_buf);

    let mut n_buf = [0u8; 4];
    r.read_exact(&mut n_buf)?;
    let n_neighbors = u32::from_le_bytes(n_buf) as usize;
    let mut neighbors = Vec::with_capacity(n_neighbors);
    for _ in 0..n_neighbors {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)?;
        neighbors.push(u64::from_le_bytes(buf));
    }

    let mut pq_len_buf = [0u8; 4];
    r.read_exact(&mut pq_len_buf)?;
    let pq_len = u32::from_le_bytes(pq_len_buf) as usize;
    let mut pq_code = vec![0u8; pq_len];
    r.read_exact(&mut pq_code)?;

    let mut offset_buf = [0u8; 8];
    r.read_exact(&mut offset_buf)?;
    let vector_offset = i64::from_le_bytes(offset_buf);

    Ok(Some(DiskRecord {
        id,
        neighbors,
        pq_code,
        vector_offset,
    }))
}

/// Rebuilds the `id -> file offset` index by a full scan of `path`.
pub fn build_offset_index(path: &Path) -> io::Result<FxHashMap<u64, u64>> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);
    let mut index = FxHashMap::default();
    loop {
        let offset = r.stream_position()?;
        match read_record(&mut r)? {
            Some(record) => {
                index.insert(record.id, offset);
            }
            None => break,
        }
    }
    Ok(index)
}

/// Reads the single record starting at `offset`.
pub fn read_record_at(path: &Path, offset: u64) -> io::Result<DiskRecord> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    read_record(&mut file)?.ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no record at offset"))
}
