//! HyperLogLog 基数估计，用于 PFADD / PFCOUNT / PFMERGE。
//!
//! 16384 个 6-bit 寄存器（P = 14），标准误差约 0.81%。哈希使用标准库
//! `DefaultHasher`，与 Redis 的 MurmurHash2 不同，但估计质量相当。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const HLL_P: u32 = 14;
pub const HLL_REGISTERS: usize = 1 << HLL_P;
const HLL_REGISTER_MAX: u8 = 63;
/// 去掉索引位后剩余的哈希位数
const HLL_Q: u32 = 64 - HLL_P;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperLogLog {
    registers: Vec<u8>,
}

impl HyperLogLog {
    pub fn new() -> Self {
        HyperLogLog {
            registers: vec![0; HLL_REGISTERS],
        }
    }

    /// 加入一个元素；寄存器有变化时返回 true（PFADD 的返回值）。
    pub fn add(&mut self, element: &[u8]) -> bool {
        let (index, rho) = Self::position(element);
        if rho > self.registers[index] {
            self.registers[index] = rho;
            true
        } else {
            false
        }
    }

    /// 寄存器下标与“前导零个数 + 1”
    fn position(element: &[u8]) -> (usize, u8) {
        let mut hasher = DefaultHasher::new();
        element.hash(&mut hasher);
        let hash = hasher.finish();

        let index = (hash & (HLL_REGISTERS as u64 - 1)) as usize;
        let rest = hash >> HLL_P;
        let rho = if rest == 0 {
            HLL_Q + 1
        } else {
            rest.leading_zeros() - HLL_P + 1
        };
        (index, (rho as u8).min(HLL_REGISTER_MAX))
    }

    pub fn count(&self) -> u64 {
        let m = HLL_REGISTERS as f64;
        let mut sum = 0.0;
        let mut zeros = 0usize;
        for &r in &self.registers {
            if r == 0 {
                zeros += 1;
            }
            sum += 1.0 / (1u64 << r) as f64;
        }

        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let raw = alpha * m * m / sum;

        // 小基数：线性计数
        if raw <= 2.5 * m && zeros > 0 {
            return (m * (m / zeros as f64).ln()).round() as u64;
        }

        let two_32 = (1u64 << 32) as f64;
        if raw <= two_32 / 30.0 {
            raw.round() as u64
        } else {
            (-two_32 * (1.0 - raw / two_32).ln()).round() as u64
        }
    }

    /// 逐寄存器取最大值；返回是否有寄存器被修改。
    pub fn merge(&mut self, other: &HyperLogLog) -> bool {
        let mut changed = false;
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
                changed = true;
            }
        }
        changed
    }

    pub fn registers(&self) -> &[u8] {
        &self.registers
    }

    /// DUMP/RESTORE 时从原始寄存器重建；长度或取值非法时返回 None。
    pub fn from_registers(registers: Vec<u8>) -> Option<Self> {
        if registers.len() != HLL_REGISTERS || registers.iter().any(|&r| r > HLL_REGISTER_MAX) {
            return None;
        }
        Some(HyperLogLog { registers })
    }

    pub fn is_empty(&self) -> bool {
        self.registers.iter().all(|&r| r == 0)
    }
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}
