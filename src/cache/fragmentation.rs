//! Splitting of oversized JSON values at natural boundaries.
//!
//! Arrays split between elements, objects between entries and strings at the
//! last line break or word break that fits, falling back to characters. Oversized children are split recursively; each fragment carries
//! the path of the container it belongs to so [`reassemble`] can rebuild the
//! original value from the fragments in order.

use crate::constants::cache::FRAGMENT_SOFT_LIMIT;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part", rename_all = "snake_case")]
pub enum FragmentPart {
    /// Complete value at the path
    Whole { value: Value },
    /// Consecutive array elements starting at `start`
    Items { start: usize, items: Vec<Value> },
    /// Subset of object entries
    Entries { entries: Map<String, Value> },
    /// Next slice of a string
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub path: Vec<PathSegment>,
    #[serde(flatten)]
    pub part: FragmentPart,
}

impl Fragment {
    pub fn size_bytes(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |b| b.len())
    }
}

fn encoded_len(value: &Value) -> usize {
    serde_json::to_vec(value).map_or(0, |b| b.len())
}

/// Split `value` so each fragment's payload stays within `max_chunk` bytes where possible
pub fn fragment(value: &Value, max_chunk: usize) -> Vec<Fragment> {
    let mut out = Vec::new();
    split(value, max_chunk.max(1), Vec::new(), &mut out);
    out
}

fn split(value: &Value, max_chunk: usize, path: Vec<PathSegment>, out: &mut Vec<Fragment>) {
    if encoded_len(value) <= max_chunk {
        out.push(Fragment {
            path,
            part: FragmentPart::Whole {
                value: value.clone(),
            },
        });
        return;
    }

    match value {
        Value::Array(items) => split_array(items, max_chunk, path, out),
        Value::Object(map) => split_object(map, max_chunk, path, out),
        Value::String(text) => split_text(text, max_chunk, path, out),
        other => out.push(Fragment {
            path,
            part: FragmentPart::Whole {
                value: other.clone(),
            },
        }),
    }
}

fn split_array(items: &[Value], max_chunk: usize, path: Vec<PathSegment>, out: &mut Vec<Fragment>) {
    let mut start = 0;
    let mut group: Vec<Value> = Vec::new();
    let mut group_len = 2;

    let flush = |start: usize, group: &mut Vec<Value>, out: &mut Vec<Fragment>| {
        if !group.is_empty() {
            out.push(Fragment {
                path: path.clone(),
                part: FragmentPart::Items {
                    start,
                    items: std::mem::take(group),
                },
            });
        }
    };

    for (index, item) in items.iter().enumerate() {
        let len = encoded_len(item);
        if len > max_chunk {
            flush(start, &mut group, out);
            group_len = 2;
            let mut child = path.clone();
            child.push(PathSegment::Index(index));
            split(item, max_chunk, child, out);
            start = index + 1;
            continue;
        }
        if !group.is_empty() && group_len + len + 1 > max_chunk {
            flush(start, &mut group, out);
            group_len = 2;
            start = index;
        }
        group_len += len + 1;
        group.push(item.clone());
    }
    flush(start, &mut group, out);
}

fn split_object(
    map: &Map<String, Value>,
    max_chunk: usize,
    path: Vec<PathSegment>,
    out: &mut Vec<Fragment>,
) {
    let mut group = Map::new();
    let mut group_len = 2;

    for (key, item) in map {
        let len = encoded_len(item) + key.len() + 4;
        if len > max_chunk {
            if !group.is_empty() {
                out.push(Fragment {
                    path: path.clone(),
                    part: FragmentPart::Entries {
                        entries: std::mem::take(&mut group),
                    },
                });
                group_len = 2;
            }
            let mut child = path.clone();
            child.push(PathSegment::Key(key.clone()));
            split(item, max_chunk, child, out);
            continue;
        }
        if !group.is_empty() && group_len + len > max_chunk {
            out.push(Fragment {
                path: path.clone(),
                part: FragmentPart::Entries {
                    entries: std::mem::take(&mut group),
                },
            });
            group_len = 2;
        }
        group_len += len;
        group.insert(key.clone(), item.clone());
    }

    if !group.is_empty() {
        out.push(Fragment {
            path,
            part: FragmentPart::Entries { entries: group },
        });
    }
}

fn split_text(text: &str, max_chunk: usize, path: Vec<PathSegment>, out: &mut Vec<Fragment>) {
    let mut rest = text;
    while !rest.is_empty() {
        let cut = text_cut(rest, max_chunk);
        let (chunk, tail) = rest.split_at(cut);
        out.push(Fragment {
            path: path.clone(),
            part: FragmentPart::Text {
                text: chunk.to_string(),
            },
        });
        rest = tail;
    }
}

/// Byte offset to cut at: after the last newline in the window, else after the
/// last space, else the last char boundary that fits
fn text_cut(text: &str, max_chunk: usize) -> usize {
    if text.len() <= max_chunk {
        return text.len();
    }

    let mut window = max_chunk;
    while !text.is_char_boundary(window) {
        window -= 1;
    }
    if window == 0 {
        // A single char wider than the chunk still goes out whole
        return text.chars().next().map_or(text.len(), char::len_utf8);
    }

    let head = &text[..window];
    head.rfind('\n')
        .or_else(|| head.rfind(' '))
        .map_or(window, |at| at + 1)
}

fn navigate<'a>(root: &'a mut Value, path: &[PathSegment]) -> &'a mut Value {
    let mut current = root;
    for segment in path {
        current = match segment {
            PathSegment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(items) => {
                        if items.len() <= *index {
                            items.resize(*index + 1, Value::Null);
                        }
                        &mut items[*index]
                    }
                    other => other,
                }
            }
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                    other => other,
                }
            }
        };
    }
    current
}

/// Rebuild the original value from fragments produced by [`fragment`]
pub fn reassemble(fragments: &[Fragment]) -> Value {
    let mut root = Value::Null;

    for fragment in fragments {
        let target = navigate(&mut root, &fragment.path);
        match &fragment.part {
            FragmentPart::Whole { value } => *target = value.clone(),
            FragmentPart::Items { start, items } => {
                if !target.is_array() {
                    *target = Value::Array(Vec::new());
                }
                if let Value::Array(existing) = target {
                    let end = start + items.len();
                    if existing.len() < end {
                        existing.resize(end, Value::Null);
                    }
                    for (offset, item) in items.iter().enumerate() {
                        existing[start + offset] = item.clone();
                    }
                }
            }
            FragmentPart::Entries { entries } => {
                if !target.is_object() {
                    *target = Value::Object(Map::new());
                }
                if let Value::Object(existing) = target {
                    for (key, value) in entries {
                        existing.insert(key.clone(), value.clone());
                    }
                }
            }
            FragmentPart::Text { text } => {
                if !target.is_string() {
                    *target = Value::String(String::new());
                }
                if let Value::String(existing) = target {
                    existing.push_str(text);
                }
            }
        }
    }

    root
}

/// Reduction of the largest single entry, with diminishing returns past the soft limit
pub fn efficiency_score(original_size: usize, fragments: &[Fragment]) -> f64 {
    if original_size == 0 || fragments.len() <= 1 {
        return 0.0;
    }

    let largest = fragments.iter().map(Fragment::size_bytes).max().unwrap_or(0);
    let reduction = (1.0 - largest as f64 / original_size as f64).max(0.0);

    if fragments.len() > FRAGMENT_SOFT_LIMIT {
        reduction * FRAGMENT_SOFT_LIMIT as f64 / fragments.len() as f64
    } else {
        reduction
    }
}
