fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

fn render(code: &str, stage: &str, action: &str, source: &str, reason: &str, err: &str) -> String {
    format!(
        "MANUAL_WARN code={} stage={} action={} source={} reason={} err={}",
        sanitize_value(code),
        sanitize_value(stage),
        sanitize_value(action),
        sanitize_value(source),
        sanitize_value(reason),
        sanitize_value(err),
    )
}

/// Emit one structured warning line on stderr.
///
/// Every degraded-but-recovered path (fallback summaries, fallback
/// selections, skipped trees, generation retries) reports through here.
pub fn emit(code: &str, stage: &str, action: &str, source: &str, reason: &str, err: &str) {
    eprintln!("{}", render(code, stage, action, source, reason, err));
}
