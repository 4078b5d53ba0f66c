use crate::classfile::cursor::{Cursor, u16_at};
use crate::error::PlanError;

pub const CONSTANT_UTF8: u8 = 1;
pub const CONSTANT_INTEGER: u8 = 3;
pub const CONSTANT_FLOAT: u8 = 4;
pub const CONSTANT_LONG: u8 = 5;
pub const CONSTANT_DOUBLE: u8 = 6;
pub const CONSTANT_CLASS: u8 = 7;
pub const CONSTANT_STRING: u8 = 8;
pub const CONSTANT_FIELDREF: u8 = 9;
pub const CONSTANT_METHODREF: u8 = 10;
pub const CONSTANT_INTERFACE_METHODREF: u8 = 11;
pub const CONSTANT_NAME_AND_TYPE: u8 = 12;
pub const CONSTANT_METHOD_HANDLE: u8 = 15;
pub const CONSTANT_METHOD_TYPE: u8 = 16;
pub const CONSTANT_DYNAMIC: u8 = 17;
pub const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
pub const CONSTANT_MODULE: u8 = 19;
pub const CONSTANT_PACKAGE: u8 = 20;

const THROWABLE_NAME: &[u8] = b"java/lang/Throwable";

/// The original constant pool, kept as tagged offsets into the class-file
/// bytes. Entries are never materialised; accessors slice the file on demand.
/// Index 0 (and the upper half of long/double entries) carry tag 0.
pub struct ConstantPool {
    count: u16,
    tags: Vec<u8>,
    offsets: Vec<u32>,
    code_name_idx: u16,
    lvt_name_idx: u16,
    lvtt_name_idx: u16,
    smt_name_idx: u16,
    throwable_class_idx: u16,
}

impl ConstantPool {
    pub fn parse(cur: &mut Cursor<'_>, file: &[u8]) -> Result<Self, PlanError> {
        let count = cur.u2()?;
        let mut tags = vec![0u8; count as usize];
        let mut offsets = vec![0u32; count as usize];

        let mut idx = 1u16;
        while idx < count {
            let tag_offset = cur.offset();
            let tag = cur.u1()?;
            tags[idx as usize] = tag;
            offsets[idx as usize] = cur.offset() as u32;
            match tag {
                CONSTANT_UTF8 => {
                    let len = cur.u2()? as usize;
                    cur.skip(len)?;
                }
                CONSTANT_INTEGER | CONSTANT_FLOAT => cur.skip(4)?,
                CONSTANT_LONG | CONSTANT_DOUBLE => {
                    cur.skip(8)?;
                    // takes two slots, the second stays tag 0
                    idx += 1;
                }
                CONSTANT_CLASS | CONSTANT_STRING | CONSTANT_METHOD_TYPE | CONSTANT_MODULE
                | CONSTANT_PACKAGE => cur.skip(2)?,
                CONSTANT_FIELDREF
                | CONSTANT_METHODREF
                | CONSTANT_INTERFACE_METHODREF
                | CONSTANT_NAME_AND_TYPE
                | CONSTANT_DYNAMIC
                | CONSTANT_INVOKE_DYNAMIC => cur.skip(4)?,
                CONSTANT_METHOD_HANDLE => cur.skip(3)?,
                other => {
                    return Err(PlanError::format_at(
                        tag_offset,
                        format!("unknown constant tag {}", other),
                    ));
                }
            }
            idx += 1;
        }

        let mut pool = Self {
            count,
            tags,
            offsets,
            code_name_idx: 0,
            lvt_name_idx: 0,
            lvtt_name_idx: 0,
            smt_name_idx: 0,
            throwable_class_idx: 0,
        };
        pool.cache_known_indices(file)?;
        Ok(pool)
    }

    fn cache_known_indices(&mut self, file: &[u8]) -> Result<(), PlanError> {
        for idx in 1..self.count {
            match self.tags[idx as usize] {
                CONSTANT_UTF8 => {
                    let bytes = self.utf8_bytes(file, idx)?;
                    match bytes {
                        b"Code" => self.code_name_idx = idx,
                        b"LocalVariableTable" => self.lvt_name_idx = idx,
                        b"LocalVariableTypeTable" => self.lvtt_name_idx = idx,
                        b"StackMapTable" => self.smt_name_idx = idx,
                        _ => {}
                    }
                }
                CONSTANT_CLASS => {
                    let name_idx = u16_at(file, self.offsets[idx as usize] as usize);
                    if self.tag(name_idx) == CONSTANT_UTF8
                        && self.utf8_bytes(file, name_idx)? == THROWABLE_NAME
                    {
                        self.throwable_class_idx = idx;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    fn tag(&self, idx: u16) -> u8 {
        if idx == 0 || idx >= self.count {
            return 0;
        }
        self.tags[idx as usize]
    }

    fn checked_offset(&self, idx: u16, expected_tag: u8) -> Result<usize, PlanError> {
        if self.tag(idx) != expected_tag {
            return Err(PlanError::format_at(
                self.offsets.get(idx as usize).copied().unwrap_or(0) as usize,
                format!(
                    "constant {} has tag {}, expected {}",
                    idx,
                    self.tag(idx),
                    expected_tag
                ),
            ));
        }
        Ok(self.offsets[idx as usize] as usize)
    }

    fn utf8_bytes<'a>(&self, file: &'a [u8], idx: u16) -> Result<&'a [u8], PlanError> {
        let off = self.checked_offset(idx, CONSTANT_UTF8)?;
        let len = u16_at(file, off) as usize;
        Ok(&file[off + 2..off + 2 + len])
    }

    pub fn utf8<'a>(&self, file: &'a [u8], idx: u16) -> Result<&'a str, PlanError> {
        let bytes = self.utf8_bytes(file, idx)?;
        std::str::from_utf8(bytes).map_err(|_| {
            PlanError::format_at(
                self.offsets[idx as usize] as usize,
                format!("constant {} is not valid UTF-8", idx),
            )
        })
    }

    pub fn class_name<'a>(&self, file: &'a [u8], idx: u16) -> Result<&'a str, PlanError> {
        let off = self.checked_offset(idx, CONSTANT_CLASS)?;
        self.utf8(file, u16_at(file, off))
    }

    /// CP index of the `Code` attribute name, 0 when the class has none.
    pub fn code_name_idx(&self) -> u16 {
        self.code_name_idx
    }

    pub fn lvt_name_idx(&self) -> u16 {
        self.lvt_name_idx
    }

    pub fn lvtt_name_idx(&self) -> u16 {
        self.lvtt_name_idx
    }

    pub fn smt_name_idx(&self) -> u16 {
        self.smt_name_idx
    }

    /// CP index of the `java/lang/Throwable` class entry, 0 when absent.
    pub fn throwable_class_idx(&self) -> u16 {
        self.throwable_class_idx
    }
}
