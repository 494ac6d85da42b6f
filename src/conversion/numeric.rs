//! `numeric` binary form: base-10000 digit groups.
//!
//! ```text
//! int16 ndigits, int16 weight, uint16 sign, uint16 dscale, int16 digits[ndigits]
//! ```
//!
//! `digits[k]` is scaled by `10000^(weight - k)`.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i16, read_u16};

const SIGN_POSITIVE: u16 = 0x0000;
const SIGN_NEGATIVE: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_PINF: u16 = 0xD000;
const SIGN_NINF: u16 = 0xF000;

const MAX_DSCALE: usize = 0x3FFF;
/// Bound on the decimal exponent accepted from text.
const MAX_EXPONENT: i64 = 147_455;

fn decode_err(msg: impl Into<String>) -> Error {
    Error::Decode(format!("numeric: {}", msg.into()))
}

/// Render the binary form as decimal text.
pub fn numeric_to_string(bytes: &[u8]) -> Result<String> {
    let header = |e: Error| decode_err(format!("truncated header: {e}"));
    let (ndigits, rest) = read_i16(bytes).map_err(header)?;
    let (weight, rest) = read_i16(rest).map_err(header)?;
    let (sign, rest) = read_u16(rest).map_err(header)?;
    let (dscale, mut rest) = read_u16(rest).map_err(header)?;

    match sign {
        SIGN_NAN => return Ok("NaN".into()),
        SIGN_PINF => return Ok("Infinity".into()),
        SIGN_NINF => return Ok("-Infinity".into()),
        SIGN_POSITIVE | SIGN_NEGATIVE => {}
        other => return Err(decode_err(format!("invalid sign 0x{other:04x}"))),
    }
    if ndigits < 0 {
        return Err(decode_err("negative digit count"));
    }

    let mut digits = Vec::with_capacity(ndigits as usize);
    for _ in 0..ndigits {
        let (d, after) = read_i16(rest).map_err(|e| decode_err(format!("truncated digits: {e}")))?;
        if !(0..10000).contains(&d) {
            return Err(decode_err(format!("digit group {d} out of range")));
        }
        digits.push(d);
        rest = after;
    }
    if !rest.is_empty() {
        return Err(decode_err("trailing bytes"));
    }

    let weight = i32::from(weight);
    let group = |k: i32| -> i16 {
        usize::try_from(k)
            .ok()
            .and_then(|k| digits.get(k).copied())
            .unwrap_or(0)
    };

    let mut out = String::with_capacity(digits.len() * 4 + usize::from(dscale) + 2);
    if sign == SIGN_NEGATIVE {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for k in 1..=weight {
            out.push_str(&format!("{:04}", group(k)));
        }
    }

    let dscale = usize::from(dscale);
    if dscale > 0 {
        out.push('.');
        let mut frac = String::with_capacity(dscale + 4);
        let mut k = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", group(k)));
            k += 1;
        }
        frac.truncate(dscale);
        out.push_str(&frac);
    }
    Ok(out)
}

/// Encode decimal text (optionally with an exponent) as the binary form.
///
/// Runs on the parameter path, so malformed input is a `BindParameter` error.
pub fn numeric_from_str(s: &str) -> Result<Vec<u8>> {
    let bind_err = |msg: &str| Error::BindParameter(format!("numeric {s:?}: {msg}"));
    let trimmed = s.trim();

    let special = match trimmed.to_ascii_lowercase().as_str() {
        "nan" => Some(SIGN_NAN),
        "infinity" | "+infinity" | "inf" | "+inf" => Some(SIGN_PINF),
        "-infinity" | "-inf" => Some(SIGN_NINF),
        _ => None,
    };
    if let Some(sign) = special {
        return Ok(header(0, 0, sign, 0));
    }

    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, trimmed.get(1..).unwrap_or_default()),
        Some(b'+') => (false, trimmed.get(1..).unwrap_or_default()),
        _ => (false, trimmed),
    };
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((m, e)) => {
            let exp: i64 = e.parse().map_err(|_| bind_err("invalid exponent"))?;
            if exp.abs() > MAX_EXPONENT {
                return Err(bind_err("exponent out of range"));
            }
            (m, exp)
        }
        None => (unsigned, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits_ok = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !digits_ok(int_part) || !digits_ok(frac_part) {
        return Err(bind_err("not a number"));
    }

    // Shift the decimal point by the exponent.
    let all: String = [int_part, frac_part].concat();
    let point = int_part.len() as i64 + exponent;
    let (int_digits, frac_digits) = if point <= 0 {
        (String::new(), "0".repeat((-point) as usize) + &all)
    } else if point as usize >= all.len() {
        (all.clone() + &"0".repeat(point as usize - all.len()), String::new())
    } else {
        let (i, f) = all.split_at(point as usize);
        (i.to_string(), f.to_string())
    };
    let dscale = frac_digits.len();
    if dscale > MAX_DSCALE {
        return Err(bind_err("scale out of range"));
    }
    let int_digits = int_digits.trim_start_matches('0');

    // Pad both sides to whole groups of four.
    let lead = (4 - int_digits.len() % 4) % 4;
    let trail = (4 - frac_digits.len() % 4) % 4;
    let padded = format!(
        "{}{int_digits}{frac_digits}{}",
        "0".repeat(lead),
        "0".repeat(trail)
    );
    let mut groups: Vec<i16> = padded
        .as_bytes()
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0')))
        .collect();
    let mut weight = ((int_digits.len() + lead) / 4) as i64 - 1;

    let leading_zeros = groups.iter().take_while(|&&g| g == 0).count();
    groups.drain(..leading_zeros);
    weight -= leading_zeros as i64;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    let weight = i16::try_from(weight).map_err(|_| bind_err("weight out of range"))?;
    let ndigits = i16::try_from(groups.len()).map_err(|_| bind_err("too many digits"))?;
    let sign = if negative && !groups.is_empty() {
        SIGN_NEGATIVE
    } else {
        SIGN_POSITIVE
    };

    let mut out = header(ndigits, weight, sign, dscale as u16);
    for g in groups {
        out.extend_from_slice(&g.to_be_bytes());
    }
    Ok(out)
}

fn header(ndigits: i16, weight: i16, sign: u16, dscale: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + ndigits.max(0) as usize * 2);
    out.extend_from_slice(&ndigits.to_be_bytes());
    out.extend_from_slice(&weight.to_be_bytes());
    out.extend_from_slice(&sign.to_be_bytes());
    out.extend_from_slice(&dscale.to_be_bytes());
    out
}

/// Normalize decimal text to what the server would print: no exponent,
/// no leading zeros, scale preserved.
pub(crate) fn canonical(s: &str) -> Result<String> {
    numeric_to_string(&numeric_from_str(s)?)
}
