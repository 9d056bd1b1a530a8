//! 暗号生成
//!
//! 字符表去掉了容易混淆的字符（0/O、1/I/L）

use std::collections::HashSet;

use rand::Rng;

use crate::error::{DropError, Result};

/// 暗号字符表
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 32;

/// 每个暗号平均允许的随机尝试次数，超出说明暗号空间已接近用尽
const ATTEMPTS_PER_CODE: usize = 16;

/// 生成一个指定长度的暗号
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// 指定长度下可生成的暗号总数（饱和计算）
pub fn code_space(length: usize) -> u64 {
    let base = CODE_ALPHABET.len() as u64;
    (0..length).fold(1u64, |acc, _| acc.saturating_mul(base))
}

/// 生成 `count` 个互不相同的暗号，并跳过 `existing` 中已有的值
///
/// 剩余空间不足或随机尝试次数用尽时返回校验错误
pub fn generate_codes(
    count: usize,
    length: usize,
    existing: &HashSet<String>,
) -> Result<Vec<String>> {
    let remaining = code_space(length).saturating_sub(existing.len() as u64);
    if count as u64 > remaining {
        return Err(DropError::Validation(format!(
            "长度为 {} 的暗号只剩 {} 个可用，无法生成 {} 个",
            length, remaining, count
        )));
    }

    let max_attempts = count.saturating_mul(ATTEMPTS_PER_CODE).max(64);
    fill_codes(&mut rand::rng(), count, length, existing, max_attempts)
}

fn fill_codes<R: Rng + ?Sized>(
    rng: &mut R,
    count: usize,
    length: usize,
    existing: &HashSet<String>,
    max_attempts: usize,
) -> Result<Vec<String>> {
    let mut seen: HashSet<String> = HashSet::with_capacity(count);
    let mut codes = Vec::with_capacity(count);

    for _ in 0..max_attempts {
        if codes.len() == count {
            break;
        }
        let code = generate_code(rng, length);
        if existing.contains(&code) || !seen.insert(code.clone()) {
            continue;
        }
        codes.push(code);
    }

    if codes.len() < count {
        return Err(DropError::Validation(format!(
            "长度为 {} 的暗号空间已接近用尽，仅生成 {} / {} 个，请增加长度",
            length,
            codes.len(),
            count
        )));
    }
    Ok(codes)
}

/// 是否仅由字符表中的字符组成（不区分大小写）
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .bytes()
            .all(|b| CODE_ALPHABET.contains(&b.to_ascii_uppercase()))
}
