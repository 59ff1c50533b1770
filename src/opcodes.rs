use anyhow::{Context, Result};

/// JVM opcode constants and instruction-length decoding.
///
/// Only the opcodes the transformers inspect get named constants; everything
/// else is handled positionally by `length`.
pub const ALOAD_0: u8 = 0x2a;
pub const IINC: u8 = 0x84;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const WIDE: u8 = 0xc4;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

/// Number of alignment bytes following a switch opcode at `offset`.
pub fn padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

/// Total encoded length of the instruction starting at `offset`.
pub fn length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = *code
        .get(offset)
        .with_context(|| format!("opcode offset {offset} out of bounds"))?;
    let length = match opcode {
        0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3a | RET | 0xbc => 2,
        0x11 | 0x13 | 0x14 | IINC | 0x99..=JSR | 0xb2..=0xb8 | 0xbb | 0xbd | 0xc0 | 0xc1
        | 0xc6 | 0xc7 => 3,
        0xc5 => 4,
        INVOKEINTERFACE | INVOKEDYNAMIC | GOTO_W | JSR_W => 5,
        WIDE => {
            let modified = *code
                .get(offset + 1)
                .context("truncated wide instruction")?;
            if modified == IINC { 6 } else { 4 }
        }
        TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let count = high
                .checked_sub(low)
                .and_then(|v| v.checked_add(1))
                .context("invalid tableswitch range")?;
            1 + padding(offset) + 12 + 4 * usize::try_from(count).context("invalid tableswitch range")?
        }
        LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let npairs = read_i32(code, base + 4)?;
            1 + padding(offset) + 8 + 8 * usize::try_from(npairs).context("invalid lookupswitch count")?
        }
        _ => 1,
    };
    Ok(length)
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = code
        .get(offset..offset + 2)
        .with_context(|| format!("truncated read at offset {offset}"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let bytes = code
        .get(offset..offset + 4)
        .with_context(|| format!("truncated read at offset {offset}"))?;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
