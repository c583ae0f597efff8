//! Filename encoding and heuristic decoding.
//!
//! On the write side names are either passed through as UTF-8 (flag bit 11
//! set) or mapped into Windows-1251. On the read side the flag cannot be
//! trusted: names from damaged archives are decoded under every code page a
//! DOS/Windows-era archiver plausibly used and the most linguistically
//! plausible candidate wins.

use std::borrow::Cow;

use codepage_437::{BorrowFromCp437, CP437_CONTROL};
use encoding_rs::{IBM866, WINDOWS_1251};

use crate::config::Encoding;
use crate::error::ArchiveError;

/// General-purpose flag bit 11: the name is UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Windows-1251 high half, 0x80..=0xFF. Index 24 (byte 0x98) is unassigned
/// and must reject on encode.
const CP1251_HIGH: [u16; 128] = [
    0x0402, 0x0403, 0x201A, 0x0453, 0x201E, 0x2026, 0x2020, 0x2021, //
    0x20AC, 0x2030, 0x0409, 0x2039, 0x040A, 0x040C, 0x040B, 0x040F, //
    0x0452, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014, //
    0x0000, 0x2122, 0x0459, 0x203A, 0x045A, 0x045C, 0x045B, 0x045F, //
    0x00A0, 0x040E, 0x045E, 0x0408, 0x00A4, 0x0490, 0x00A6, 0x00A7, //
    0x0401, 0x00A9, 0x0404, 0x00AB, 0x00AC, 0x00AD, 0x00AE, 0x0407, //
    0x00B0, 0x00B1, 0x0406, 0x0456, 0x0491, 0x00B5, 0x00B6, 0x00B7, //
    0x0451, 0x2116, 0x0454, 0x00BB, 0x0458, 0x0405, 0x0455, 0x0457, //
    0x0410, 0x0411, 0x0412, 0x0413, 0x0414, 0x0415, 0x0416, 0x0417, //
    0x0418, 0x0419, 0x041A, 0x041B, 0x041C, 0x041D, 0x041E, 0x041F, //
    0x0420, 0x0421, 0x0422, 0x0423, 0x0424, 0x0425, 0x0426, 0x0427, //
    0x0428, 0x0429, 0x042A, 0x042B, 0x042C, 0x042D, 0x042E, 0x042F, //
    0x0430, 0x0431, 0x0432, 0x0433, 0x0434, 0x0435, 0x0436, 0x0437, //
    0x0438, 0x0439, 0x043A, 0x043B, 0x043C, 0x043D, 0x043E, 0x043F, //
    0x0440, 0x0441, 0x0442, 0x0443, 0x0444, 0x0445, 0x0446, 0x0447, //
    0x0448, 0x0449, 0x044A, 0x044B, 0x044C, 0x044D, 0x044E, 0x044F, //
];

/// Encodes a member name in the configured encoding, returning the raw bytes
/// and the general-purpose flag bits the entry must carry.
pub fn encode_name(name: &str, encoding: Encoding) -> Result<(Vec<u8>, u16), ArchiveError> {
    match encoding {
        Encoding::Utf8 => Ok((name.as_bytes().to_vec(), FLAG_UTF8)),
        Encoding::Cp1251 => Ok((encode_cp1251(name)?, 0)),
    }
}

fn encode_cp1251(s: &str) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::with_capacity(s.len());
    for ch in s.chars() {
        let cp = u32::from(ch);
        if cp < 0x80 {
            out.push(cp as u8);
            continue;
        }
        match CP1251_HIGH
            .iter()
            .position(|&u| u != 0 && u32::from(u) == cp)
        {
            Some(idx) => out.push(0x80 + idx as u8),
            None => return Err(ArchiveError::Encoding { ch, encoding: "cp1251" }),
        }
    }
    Ok(out)
}

/// Decodes a member name read from an archive.
///
/// With flag bit 11 set the bytes must be valid UTF-8; anything else is
/// rejected. With the bit clear, candidates are produced under UTF-8 (when
/// valid), CP866, CP1251, and CP437, and the highest-scoring candidate wins.
/// Earlier candidates win ties.
pub fn decode_name(raw: &[u8], gp_flags: u16) -> Option<String> {
    if gp_flags & FLAG_UTF8 != 0 {
        return std::str::from_utf8(raw).ok().map(str::to_owned);
    }

    let mut candidates: Vec<String> = Vec::with_capacity(4);
    if let Ok(s) = std::str::from_utf8(raw) {
        candidates.push(s.to_owned());
    }
    let (cp866, _) = IBM866.decode_without_bom_handling(raw);
    candidates.push(cp866.into_owned());
    let (cp1251, _) = WINDOWS_1251.decode_without_bom_handling(raw);
    candidates.push(cp1251.into_owned());
    let cp437: Cow<str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
    candidates.push(cp437.into_owned());

    let mut best: Option<(i32, String)> = None;
    for cand in candidates {
        let score = score_name(&cand);
        match &best {
            Some((top, _)) if *top >= score => {}
            _ => best = Some((score, cand)),
        }
    }
    best.map(|(_, name)| name)
}

/// Linguistic plausibility score for a decoded name.
///
/// Cyrillic text mis-decoded under CP437 turns into box-drawing noise, so
/// the correct code page reliably dominates. The table is deliberately
/// crude: letters and digits reward, junk classes punish.
pub fn score_name(s: &str) -> i32 {
    let mut score = 0;
    for ch in s.chars() {
        score += match ch {
            c if c.is_alphanumeric() => 2,
            ' ' | '.' | '_' | '-' | '(' | ')' | '[' | ']' | '{' | '}' => 1,
            '/' | '\\' => 1,
            '\t' | '\r' | '\n' => -5,
            '\u{2500}'..='\u{257F}' => -3,
            '\u{FFFD}' => -5,
            c if !c.is_control() => 0,
            _ => -3,
        };
    }
    score
}
