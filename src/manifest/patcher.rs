//! Line-oriented editor for the `values -> controllers -> main -> containers
//! -> <container> -> resources` path inside a structured-indentation YAML
//! file. Deliberately does NOT parse or reserialize YAML: comments, key
//! order, anchors, and whitespace outside the `resources` block survive
//! untouched.

use std::fmt;

/// Outcome of one patch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchReason {
    ResourcesInserted,
    ResourcesReplaced,
    ResourcesUnchanged,
    /// `<key>_not_found` for the first missing ancestor in the landmark path.
    NotFound(String),
}

impl fmt::Display for PatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchReason::ResourcesInserted => write!(f, "resources_inserted"),
            PatchReason::ResourcesReplaced => write!(f, "resources_replaced"),
            PatchReason::ResourcesUnchanged => write!(f, "resources_unchanged"),
            PatchReason::NotFound(key) => write!(f, "{}_not_found", key),
        }
    }
}

fn leading_spaces(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ').count()
}

/// First line at exactly `indent` whose content (after stripping that
/// indent) starts with `"{key}:"`, searched in `[start, end)`.
fn find_key(lines: &[&str], start: usize, end: usize, key: &str, indent: usize) -> Option<usize> {
    let needle = format!("{}:", key);
    (start..end).find(|&i| {
        let line = lines[i];
        !line.trim().is_empty() && leading_spaces(line) == indent && line[indent..].starts_with(&needle)
    })
}

/// First subsequent non-blank line whose indentation is <= `indent`, i.e.
/// the end of the block opened by a key found at `indent`. Bounded by `end`.
fn block_end(lines: &[&str], key_index: usize, indent: usize, end: usize) -> usize {
    ((key_index + 1)..end)
        .find(|&i| {
            let line = lines[i];
            !line.trim().is_empty() && leading_spaces(line) <= indent
        })
        .unwrap_or(end)
}

fn indent_str(n: usize) -> String {
    " ".repeat(n)
}

fn canonical_resources_block(v10: usize, req_cpu: &str, req_mem: &str, lim_cpu: &str, lim_mem: &str) -> Vec<String> {
    let v12 = indent_str(v10 + 2);
    let v14 = indent_str(v10 + 4);
    vec![
        format!("{}resources:", indent_str(v10)),
        format!("{}requests:", v12),
        format!("{}cpu: \"{}\"", v14, req_cpu),
        format!("{}memory: \"{}\"", v14, req_mem),
        format!("{}limits:", v12),
        format!("{}cpu: \"{}\"", v14, lim_cpu),
        format!("{}memory: \"{}\"", v14, lim_mem),
    ]
}

/// Patch one container's `resources` block to the given request/limit
/// quantity strings (already canonically formatted, e.g. `"125m"`/`"320Mi"`).
///
/// Returns `(new_content, changed, reason)`. `changed` is false both when
/// the ancestor path could not be located (content is returned unmodified)
/// and when the resources block already matched byte-for-byte.
pub fn patch_container_resources(
    content: &str,
    container_name: &str,
    req_cpu: &str,
    req_mem: &str,
    lim_cpu: &str,
    lim_mem: &str,
) -> (String, bool, PatchReason) {
    let had_trailing_newline = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();
    let n = lines.len();

    let Some(values_idx) = (0..n).find(|&i| !lines[i].trim().is_empty() && lines[i][leading_spaces(lines[i])..].starts_with("values:")) else {
        return (content.to_string(), false, PatchReason::NotFound("values".to_string()));
    };
    let v = leading_spaces(lines[values_idx]);
    let values_end = block_end(&lines, values_idx, v, n);

    let Some(controllers_idx) = find_key(&lines, values_idx + 1, values_end, "controllers", v + 2) else {
        return (content.to_string(), false, PatchReason::NotFound("controllers".to_string()));
    };
    let controllers_end = block_end(&lines, controllers_idx, v + 2, values_end);

    let Some(main_idx) = find_key(&lines, controllers_idx + 1, controllers_end, "main", v + 4) else {
        return (content.to_string(), false, PatchReason::NotFound("main".to_string()));
    };
    let main_end = block_end(&lines, main_idx, v + 4, controllers_end);

    let Some(containers_idx) = find_key(&lines, main_idx + 1, main_end, "containers", v + 6) else {
        return (content.to_string(), false, PatchReason::NotFound("containers".to_string()));
    };
    let containers_end = block_end(&lines, containers_idx, v + 6, main_end);

    let Some(container_idx) = find_key(&lines, containers_idx + 1, containers_end, container_name, v + 8) else {
        return (content.to_string(), false, PatchReason::NotFound(container_name.to_string()));
    };
    let container_end = block_end(&lines, container_idx, v + 8, containers_end);

    let canonical = canonical_resources_block(v + 10, req_cpu, req_mem, lim_cpu, lim_mem);

    let (replace_start, replace_end, reason_if_unchanged_possible) =
        match find_key(&lines, container_idx + 1, container_end, "resources", v + 10) {
            Some(resources_idx) => {
                let resources_end = block_end(&lines, resources_idx, v + 10, container_end);
                (resources_idx, resources_end, true)
            }
            None => (container_idx + 1, container_idx + 1, false),
        };

    let existing: Vec<&str> = lines[replace_start..replace_end].to_vec();
    let unchanged = reason_if_unchanged_possible && existing == canonical;

    if unchanged {
        return (content.to_string(), false, PatchReason::ResourcesUnchanged);
    }

    let mut new_lines: Vec<String> = Vec::with_capacity(n + 7);
    new_lines.extend(lines[..replace_start].iter().map(|s| s.to_string()));
    new_lines.extend(canonical);
    new_lines.extend(lines[replace_end..].iter().map(|s| s.to_string()));

    let mut new_content = new_lines.join("\n");
    if had_trailing_newline {
        new_content.push('\n');
    }

    let reason = if reason_if_unchanged_possible {
        PatchReason::ResourcesReplaced
    } else {
        PatchReason::ResourcesInserted
    };

    (new_content, true, reason)
}
