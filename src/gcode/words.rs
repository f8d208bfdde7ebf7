//! Lexical helpers: comment stripping, program line iteration and word
//! tokenizing.

/// A single G-code word: an upper-cased letter paired with its numeric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Word {
    pub letter: char,
    pub value: f64,
}

/// Removes `( ... )` comments and everything after a `;`, then trims.
///
/// An unclosed `(` drops the rest of the line.
pub fn strip_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_paren = false;

    for ch in line.chars() {
        match ch {
            '(' if !in_paren => in_paren = true,
            ')' if in_paren => in_paren = false,
            ';' if !in_paren => break,
            _ if in_paren => {}
            _ => out.push(ch),
        }
    }

    out.trim().to_string()
}

/// Yields every non-empty, comment-free line of `text`.
///
/// This is the form a program takes both for preview and for streaming.
pub fn iter_program_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(strip_comments)
        .filter(|line| !line.is_empty())
}

/// Splits `line` into `(letter, value)` words.
///
/// A word is an ASCII letter followed by an optional sign, digits and an
/// optional fractional part (`X-.5`, `G01`, `F+300`). Letters with no number
/// after them and any other characters are skipped.
pub fn tokenize(line: &str) -> Vec<Word> {
    let bytes = line.as_bytes();
    let mut words = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let letter = bytes[i];
        if !letter.is_ascii_alphabetic() {
            i += 1;
            continue;
        }

        let start = i + 1;
        let end = scan_number(bytes, start);
        if end > start {
            if let Some(value) = line.get(start..end).and_then(|s| s.parse::<f64>().ok()) {
                words.push(Word {
                    letter: (letter as char).to_ascii_uppercase(),
                    value,
                });
            }
            i = end;
        } else {
            i += 1;
        }
    }

    words
}

/// Returns the end index of a number starting at `start`, or `start` when no
/// number is present.
fn scan_number(bytes: &[u8], start: usize) -> usize {
    let mut j = start;
    if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
        j += 1;
    }

    let int_start = j;
    while bytes.get(j).is_some_and(u8::is_ascii_digit) {
        j += 1;
    }
    let int_digits = j - int_start;

    let mut frac_digits = 0;
    if bytes.get(j) == Some(&b'.') {
        let mut k = j + 1;
        while bytes.get(k).is_some_and(u8::is_ascii_digit) {
            k += 1;
        }
        frac_digits = k - (j + 1);
        if frac_digits > 0 {
            j = k;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        start
    } else {
        j
    }
}
