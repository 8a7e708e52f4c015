//! Source-annotation scanning.
//!
//! Patch sources declare their own hooks with `#pragma` lines directly above
//! the function they splice in:
//!
//! ```c
//! #pragma hook bl 0x800F1234 0x800F5678
//! void OnDamage(Player* player) { ... }
//! ```
//!
//! Supported forms: `hook b|bl <addr...>`, `inject pointer <addr...>`,
//! `inject string <addr> "text"`, `nop <addr...>`. Hook and pointer pragmas
//! take their symbol from the next function signature; C++ signatures are
//! reduced to the demangled spelling the symbol table indexes.

use crate::addr::{Address, AddressSpace};
use crate::error::{PatchError, Result};
use crate::hook::{Hook, HookKind, StringEncoding};
use crate::utils::parse_hex_u32;

fn strip_comment(line: &str) -> &str {
    line.split("//").next().unwrap_or("").trim()
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Strip one parameter down to its type: drop a trailing parameter name,
/// keeping bare builtin types intact.
fn parameter_type(param: &str) -> String {
    let param = param.split_whitespace().collect::<Vec<_>>().join(" ");
    if param.is_empty() {
        return param;
    }
    let cut = param
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map(|i| i + 1)
        .unwrap_or(0);
    let (head, tail) = param.split_at(cut);
    let head = head.trim_end();
    let keep_whole = head.is_empty()
        || matches!(tail, "" | "const" | "volatile" | "unsigned" | "signed" | "int" | "char" | "short" | "long" | "float" | "double" | "bool" | "void");
    if keep_whole {
        param
    } else {
        head.to_string()
    }
}

/// Reduce a function signature line to the symbol hooks resolve against:
/// the bare name for C linkage, `name(types)` for C++.
fn signature_symbol(line: &str, c_linkage: bool) -> Option<String> {
    let open = line.find('(')?;
    let name_start = line[..open].rfind(|c: char| !is_ident(c)).map(|i| i + 1).unwrap_or(0);
    let name = &line[name_start..open];
    if name.is_empty() {
        return None;
    }
    if c_linkage {
        return Some(name.to_string());
    }

    let close = line.rfind(')')?;
    let args = line[open + 1..close].trim();
    if args.is_empty() || args == "void" {
        return Some(format!("{name}()"));
    }

    // Split on top-level commas only.
    let mut params = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in args.char_indices() {
        match c {
            '(' | '<' | '[' => depth += 1,
            ')' | '>' | ']' => depth -= 1,
            ',' if depth == 0 => {
                params.push(parameter_type(&args[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(parameter_type(&args[start..]));
    Some(format!("{}({})", name, params.join(", ")))
}

/// Walk forward to the declared function and return its symbol.
fn next_function_symbol(
    lines: &[&str],
    cursor: &mut usize,
    mut c_linkage: bool,
) -> Option<String> {
    while *cursor < lines.len() {
        let line = strip_comment(lines[*cursor]);
        *cursor += 1;
        if line.contains("extern \"C\"") {
            c_linkage = true;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.contains('(') {
            return signature_symbol(line, c_linkage);
        }
    }
    None
}

fn parse_addresses(tokens: &[&str], space: AddressSpace, at: &str) -> Result<Vec<Address>> {
    if tokens.is_empty() {
        return Err(PatchError::PragmaParse(format!("no addresses given at {at}")));
    }
    tokens
        .iter()
        .map(|t| {
            let raw = parse_hex_u32(t)
                .ok_or_else(|| PatchError::PragmaParse(format!("bad address {t:?} at {at}")))?;
            space.address(raw)
        })
        .collect()
}

/// Scan one source file's text for hook pragmas. `path` labels origins in
/// duplicate and error reports; a `.c` extension implies C linkage.
pub fn scan_source(text: &str, path: &str, space: AddressSpace) -> Result<Vec<Hook>> {
    let lines: Vec<&str> = text.lines().collect();
    let file_c_linkage = path.ends_with(".c");
    let mut hooks = Vec::new();
    let mut cursor = 0usize;

    while cursor < lines.len() {
        let line_number = cursor + 1;
        let line = strip_comment(lines[cursor]);
        cursor += 1;
        let Some(rest) = line.strip_prefix("#pragma ") else {
            continue;
        };
        let at = format!("{path}:{line_number}");
        let tokens: Vec<&str> = rest.split_whitespace().collect();

        match tokens.as_slice() {
            ["hook", branch_type, addresses @ ..] => {
                let link = match *branch_type {
                    "b" => false,
                    "bl" => true,
                    other => {
                        return Err(PatchError::PragmaParse(format!(
                            "{other:?} is not a branch type (b or bl) at {at}"
                        )))
                    }
                };
                let symbol = next_function_symbol(&lines, &mut cursor, file_c_linkage)
                    .ok_or_else(|| {
                        PatchError::PragmaParse(format!("no function follows the hook at {at}"))
                    })?;
                for target in parse_addresses(addresses, space, &at)? {
                    hooks.push(
                        Hook::new(target, HookKind::Branch { symbol: symbol.clone(), link })
                            .with_origin(path, line_number),
                    );
                }
            }
            ["inject", "pointer", addresses @ ..] => {
                let symbol = next_function_symbol(&lines, &mut cursor, file_c_linkage)
                    .ok_or_else(|| {
                        PatchError::PragmaParse(format!("no function follows the inject at {at}"))
                    })?;
                for target in parse_addresses(addresses, space, &at)? {
                    hooks.push(
                        Hook::new(target, HookKind::Pointer { symbol: symbol.clone() })
                            .with_origin(path, line_number),
                    );
                }
            }
            ["inject", "string", address, ..] => {
                let text = rest
                    .split_once('"')
                    .and_then(|(_, tail)| tail.rsplit_once('"'))
                    .map(|(body, _)| body.to_string())
                    .ok_or_else(|| {
                        PatchError::PragmaParse(format!(
                            "inject string needs a quoted literal at {at}"
                        ))
                    })?;
                for target in parse_addresses(&[*address], space, &at)? {
                    hooks.push(
                        Hook::new(
                            target,
                            HookKind::String {
                                text: text.clone(),
                                encoding: StringEncoding::default(),
                            },
                        )
                            .with_origin(path, line_number),
                    );
                }
            }
            ["nop", addresses @ ..] => {
                for target in parse_addresses(addresses, space, &at)? {
                    hooks.push(Hook::new(target, HookKind::Nop).with_origin(path, line_number));
                }
            }
            _ => {
                // Unknown pragmas (once, GCC diagnostics) belong to the
                // compiler, not to us.
                tracing::trace!("ignoring pragma {:?} at {}", rest, at);
            }
        }
    }
    Ok(hooks)
}
