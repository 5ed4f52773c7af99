//! Character-budgeted chunking of file contents, split on line boundaries
//! with a trailing-context overlap carried into the next chunk.

/// Maximum bytes per chunk.
pub const CHUNK_SIZE: usize = 800;
/// Bytes of trailing context repeated at the start of the next chunk.
pub const CHUNK_OVERLAP: usize = 150;

/// Split `text` into overlapping chunks of at most `CHUNK_SIZE` bytes.
pub fn split_text(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.len() > CHUNK_SIZE {
            flush(&mut chunks, &mut current);
            split_long_line(line, &mut chunks);
            current = overlap_tail(chunks.last().map(String::as_str).unwrap_or(""));
            continue;
        }

        if !current.is_empty() && current.len() + line.len() + 1 > CHUNK_SIZE {
            let tail = overlap_tail(&current);
            flush(&mut chunks, &mut current);
            // Seed the next chunk with trailing context unless the incoming
            // line would push it straight past the budget again.
            if tail.len() + line.len() + 1 <= CHUNK_SIZE {
                current = tail;
            }
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }

    flush(&mut chunks, &mut current);
    chunks
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

/// A single line over the budget is windowed on char boundaries.
fn split_long_line(line: &str, chunks: &mut Vec<String>) {
    let step = CHUNK_SIZE - CHUNK_OVERLAP;
    let mut start = 0;
    while start < line.len() {
        let end = char_floor(line, (start + CHUNK_SIZE).min(line.len()));
        chunks.push(line[start..end].to_string());
        if end == line.len() {
            break;
        }
        start = char_floor(line, start + step);
    }
}

/// The last `CHUNK_OVERLAP` bytes of a chunk, aligned to a char boundary.
fn overlap_tail(chunk: &str) -> String {
    if chunk.len() <= CHUNK_OVERLAP {
        return chunk.to_string();
    }
    let mut start = chunk.len() - CHUNK_OVERLAP;
    while !chunk.is_char_boundary(start) {
        start += 1;
    }
    chunk[start..].to_string()
}

fn char_floor(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
