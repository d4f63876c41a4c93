//! Splitting long outbound bodies into postable chunks

/// Default chunk limit for outbound posts.
pub const DEFAULT_CHUNK_LIMIT: usize = 1500;

/// Split `content` into chunks of at most `limit` bytes, preferring
/// newline boundaries, then spaces, then a hard cut on a char boundary.
/// Chunks are returned in posting order.
pub fn split_message(content: &str, limit: usize) -> Vec<String> {
    if limit == 0 || content.len() <= limit {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in content.split_inclusive('\n') {
        if !current.is_empty() && current.len() + line.len() > limit {
            push_chunk(&mut chunks, &mut current);
        }

        if line.len() <= limit {
            current.push_str(line);
            continue;
        }

        // A single oversized line: cut at spaces where possible.
        let mut rest = line;
        while rest.len() > limit {
            let cut = split_point(rest, limit);
            current.push_str(&rest[..cut]);
            push_chunk(&mut chunks, &mut current);
            rest = rest[cut..].trim_start_matches(' ');
        }
        current.push_str(rest);
    }

    if !current.trim().is_empty() {
        push_chunk(&mut chunks, &mut current);
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<String>, current: &mut String) {
    let chunk = std::mem::take(current);
    let trimmed = chunk.trim_end_matches('\n');
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Largest cut index <= limit, preferring the last space, always on a
/// char boundary.
fn split_point(s: &str, limit: usize) -> usize {
    let mut boundary = limit;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    match s[..boundary].rfind(' ') {
        Some(space) if space > 0 => space,
        _ => boundary,
    }
}
