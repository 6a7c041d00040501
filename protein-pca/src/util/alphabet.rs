/// 蛋白质比对字母表大小：gap + 20 种标准氨基酸 + B/X/Z 歧义码
pub const SIGMA: usize = 24;

/// gap 的编码，同时也是 gap 的 rank
pub const GAP: u8 = 0;

/// 编码 -> 字符，编码顺序即字母序（gap 在最前）
pub const SYMBOLS: &[u8; SIGMA] = b"-ABCDEFGHIKLMNPQRSTVWXYZ";

const INVALID: u8 = u8::MAX;

const ENCODE_TABLE: [u8; 256] = build_encode_table();

const fn build_encode_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut code = 0;
    while code < SIGMA {
        let up = SYMBOLS[code];
        table[up as usize] = code as u8;
        table[up.to_ascii_lowercase() as usize] = code as u8;
        code += 1;
    }
    // 部分比对工具用 '.' 表示末端 gap
    table[b'.' as usize] = GAP;
    table
}

/// 字符 -> 编码；不在字母表内（J、O、U、'*' 等）返回 None
#[inline]
pub fn encode(b: u8) -> Option<u8> {
    match ENCODE_TABLE[b as usize] {
        INVALID => None,
        code => Some(code),
    }
}

#[inline]
pub fn decode(code: u8) -> u8 {
    SYMBOLS.get(code as usize).copied().unwrap_or(b'X')
}

#[inline]
pub fn is_gap(code: u8) -> bool {
    code == GAP
}

/// 编码整条序列，失败时返回第一个非法字符
pub fn encode_seq(seq: &[u8]) -> Result<Vec<u8>, u8> {
    seq.iter().map(|&b| encode(b).ok_or(b)).collect()
}

pub fn decode_seq(codes: &[u8]) -> Vec<u8> {
    codes.iter().map(|&c| decode(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_alphabetical_order() {
        assert_eq!(encode(b'-'), Some(0));
        assert_eq!(encode(b'A'), Some(1));
        assert_eq!(encode(b'K'), Some(10));
        assert_eq!(encode(b'Z'), Some(23));
        for w in SYMBOLS[1..].windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn lowercase_and_dot_are_accepted() {
        assert_eq!(encode(b'c'), encode(b'C'));
        assert_eq!(encode(b'.'), Some(GAP));
    }

    #[test]
    fn unknown_symbols_rejected() {
        for b in [b'J', b'O', b'U', b'*', b'1', b' '] {
            assert_eq!(encode(b), None, "{}", b as char);
        }
        assert_eq!(encode_seq(b"AC*D"), Err(b'*'));
    }

    #[test]
    fn decode_roundtrips_alphabet() {
        let codes = encode_seq(SYMBOLS).unwrap();
        assert_eq!(decode_seq(&codes), SYMBOLS.to_vec());
    }
}
