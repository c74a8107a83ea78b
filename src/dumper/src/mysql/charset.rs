//! Character-set byte of the handshake and charset-aware string decoding.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Lower byte of the collation id sent in HandshakeResponse41.
/// Only the sets MySQL actually assigns to that byte are mapped; anything
/// else decodes as `Unknown` and renders as an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive)]
#[repr(u8)]
pub enum CharSet {
    #[default]
    Unknown = 0,
    Big5 = 1,
    Dec8 = 3,
    Cp850 = 4,
    Hp8 = 6,
    Koi8r = 7,
    Latin1 = 8,
    Latin2 = 9,
    Swe7 = 10,
    Ascii = 11,
    Ujis = 12,
    Sjis = 13,
    Hebrew = 16,
    Tis620 = 18,
    Euckr = 19,
    Koi8u = 22,
    Gb2312 = 24,
    Greek = 25,
    Cp1250 = 26,
    Gbk = 28,
    Latin5 = 30,
    Armscii8 = 32,
    Utf8 = 33,
    Ucs2 = 35,
    Cp866 = 36,
    Keybcs2 = 37,
    Macce = 38,
    Macroman = 39,
    Cp852 = 40,
    Latin7 = 41,
    Cp1251 = 51,
    Utf16 = 54,
    Utf16le = 56,
    Cp1256 = 57,
    Cp1257 = 59,
    Utf32 = 60,
    Binary = 63,
    Geostd8 = 92,
    Cp932 = 95,
    Eucjpms = 97,
    Gb18030 = 248,
    Utf8mb4 = 255,
}

impl CharSet {
    pub fn from_byte(b: u8) -> CharSet {
        CharSet::from_u8(b).unwrap_or(CharSet::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            CharSet::Unknown => "",
            CharSet::Big5 => "big5",
            CharSet::Dec8 => "dec8",
            CharSet::Cp850 => "cp850",
            CharSet::Hp8 => "hp8",
            CharSet::Koi8r => "koi8r",
            CharSet::Latin1 => "latin1",
            CharSet::Latin2 => "latin2",
            CharSet::Swe7 => "swe7",
            CharSet::Ascii => "ascii",
            CharSet::Ujis => "ujis",
            CharSet::Sjis => "sjis",
            CharSet::Hebrew => "hebrew",
            CharSet::Tis620 => "tis620",
            CharSet::Euckr => "euckr",
            CharSet::Koi8u => "koi8u",
            CharSet::Gb2312 => "gb2312",
            CharSet::Greek => "greek",
            CharSet::Cp1250 => "cp1250",
            CharSet::Gbk => "gbk",
            CharSet::Latin5 => "latin5",
            CharSet::Armscii8 => "armscii8",
            CharSet::Utf8 => "utf8",
            CharSet::Ucs2 => "ucs2",
            CharSet::Cp866 => "cp866",
            CharSet::Keybcs2 => "keybcs2",
            CharSet::Macce => "macce",
            CharSet::Macroman => "macroman",
            CharSet::Cp852 => "cp852",
            CharSet::Latin7 => "latin7",
            CharSet::Cp1251 => "cp1251",
            CharSet::Utf16 => "utf16",
            CharSet::Utf16le => "utf16le",
            CharSet::Cp1256 => "cp1256",
            CharSet::Cp1257 => "cp1257",
            CharSet::Utf32 => "utf32",
            CharSet::Binary => "binary",
            CharSet::Geostd8 => "geostd8",
            CharSet::Cp932 => "cp932",
            CharSet::Eucjpms => "eucjpms",
            CharSet::Gb18030 => "gb18030",
            CharSet::Utf8mb4 => "utf8mb4",
        }
    }
}

/// Decode query text according to the session charset. The Japanese sets
/// are transcoded; everything else is treated as UTF-8 with trailing NULs
/// trimmed (the fallback when no handshake was witnessed).
pub fn decode_string(src: &[u8], char_set: CharSet) -> String {
    match char_set {
        CharSet::Ujis | CharSet::Eucjpms => {
            let (decoded, _, had_errors) = encoding_rs::EUC_JP.decode(src);
            if had_errors {
                String::from_utf8_lossy(src).into_owned()
            } else {
                decoded.into_owned()
            }
        }
        CharSet::Sjis | CharSet::Cp932 => {
            let (decoded, _, had_errors) = encoding_rs::SHIFT_JIS.decode(src);
            if had_errors {
                String::from_utf8_lossy(src).into_owned()
            } else {
                decoded.into_owned()
            }
        }
        _ => String::from_utf8_lossy(src)
            .trim_end_matches('\0')
            .to_string(),
    }
}
