use crate::Symbol;
use crate::classfile::constant_pool::ConstantPool;
use crate::classfile::cursor::Cursor;
use crate::error::PlanError;
use lasso::ThreadedRodeo;
use smallvec::SmallVec;

pub mod constant_pool;
pub mod cursor;

const MAGIC: u32 = 0xCAFE_BABE;
const OBJECT_NAME: &str = "java/lang/Object";
const INIT_NAME: &str = "<init>";

/// Per-method parallel arrays. `code_offsets[i]` is the absolute offset of
/// method `i`'s bytecode in the original file, 0 for native/abstract methods.
pub struct MethodTable {
    pub(crate) names: Vec<Symbol>,
    pub(crate) descriptors: Vec<Symbol>,
    pub(crate) access_flags: Vec<u16>,
    pub(crate) info_offsets: Vec<u32>,
    pub(crate) info_lens: Vec<u32>,
    pub(crate) code_offsets: Vec<u32>,
    pub(crate) code_lens: Vec<u32>,
    pub(crate) exc_table_offsets: Vec<u32>,
}

impl MethodTable {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn with_capacity(m: usize) -> Self {
        Self {
            names: Vec::with_capacity(m),
            descriptors: Vec::with_capacity(m),
            access_flags: Vec::with_capacity(m),
            info_offsets: Vec::with_capacity(m),
            info_lens: Vec::with_capacity(m),
            code_offsets: Vec::with_capacity(m),
            code_lens: Vec::with_capacity(m),
            exc_table_offsets: Vec::with_capacity(m),
        }
    }
}

/// Decoded class-file skeleton, consumed by `ClassRecord::from_class_file`.
pub struct ParsedClass {
    pub(crate) file: Vec<u8>,
    pub(crate) minor_version: u16,
    pub(crate) major_version: u16,
    pub(crate) access_flags: u16,
    pub(crate) this_class_idx: u16,
    pub(crate) name: Symbol,
    pub(crate) super_name: Option<Symbol>,
    pub(crate) interfaces: SmallVec<[Symbol; 4]>,
    pub(crate) cp: ConstantPool,
    pub(crate) methods: MethodTable,
    pub(crate) is_object: bool,
    pub(crate) init_name: Symbol,
}

/// Parses `file` in JVMS order. Fails with `NameMismatch` when `this_class`
/// disagrees with the name the repository asked for.
pub fn parse_class(
    file: Vec<u8>,
    expected_name: &str,
    interner: &ThreadedRodeo,
) -> Result<ParsedClass, PlanError> {
    let mut cur = Cursor::new(&file);

    let magic = cur.u4()?;
    if magic != MAGIC {
        return Err(PlanError::format_at(
            0,
            format!("bad magic 0x{:08X}", magic),
        ));
    }
    let minor_version = cur.u2()?;
    let major_version = cur.u2()?;

    let cp = ConstantPool::parse(&mut cur, &file)?;

    let access_flags = cur.u2()?;
    let this_class_idx = cur.u2()?;
    let super_class_idx = cur.u2()?;

    let name_str = cp.class_name(&file, this_class_idx)?;
    if name_str != expected_name {
        return Err(PlanError::NameMismatch {
            expected: expected_name.to_string(),
            found: name_str.to_string(),
        });
    }
    let name = interner.get_or_intern(name_str);
    let is_object = name_str == OBJECT_NAME;

    let super_name = if super_class_idx == 0 {
        None
    } else {
        Some(interner.get_or_intern(cp.class_name(&file, super_class_idx)?))
    };

    let interface_count = cur.u2()?;
    let mut interfaces: SmallVec<[Symbol; 4]> = SmallVec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        let idx = cur.u2()?;
        interfaces.push(interner.get_or_intern(cp.class_name(&file, idx)?));
    }

    skip_fields(&mut cur)?;
    let methods = parse_methods(&mut cur, &file, &cp, interner)?;
    skip_attributes(&mut cur)?;

    Ok(ParsedClass {
        minor_version,
        major_version,
        access_flags,
        this_class_idx,
        name,
        super_name,
        interfaces,
        cp,
        methods,
        is_object,
        init_name: interner.get_or_intern(INIT_NAME),
        file,
    })
}

fn skip_fields(cur: &mut Cursor<'_>) -> Result<(), PlanError> {
    let count = cur.u2()?;
    for _ in 0..count {
        cur.skip(6)?;
        skip_attributes(cur)?;
    }
    Ok(())
}

fn skip_attributes(cur: &mut Cursor<'_>) -> Result<(), PlanError> {
    let count = cur.u2()?;
    for _ in 0..count {
        cur.skip(2)?;
        let len = cur.u4()?;
        cur.skip(len as usize)?;
    }
    Ok(())
}

fn parse_methods(
    cur: &mut Cursor<'_>,
    file: &[u8],
    cp: &ConstantPool,
    interner: &ThreadedRodeo,
) -> Result<MethodTable, PlanError> {
    let count = cur.u2()? as usize;
    let mut table = MethodTable::with_capacity(count);
    for _ in 0..count {
        let info_off = cur.offset();
        let access = cur.u2()?;
        let name_idx = cur.u2()?;
        let desc_idx = cur.u2()?;
        let attr_count = cur.u2()?;

        let mut code_off = 0u32;
        let mut code_len = 0u32;
        let mut exc_off = 0u32;
        for _ in 0..attr_count {
            let attr_name = cur.u2()?;
            let attr_len = cur.u4()? as usize;
            let body_start = cur.offset();
            if attr_name == cp.code_name_idx() && code_off == 0 {
                cur.skip(4)?; // max_stack, max_locals
                let len = cur.u4()?;
                code_off = cur.offset() as u32;
                code_len = len;
                cur.skip(len as usize)?;
                exc_off = cur.offset() as u32;
                let exc_count = cur.u2()?;
                cur.skip(exc_count as usize * 8)?;
                let sub_count = cur.u2()?;
                for _ in 0..sub_count {
                    cur.skip(2)?;
                    let sub_len = cur.u4()?;
                    cur.skip(sub_len as usize)?;
                }
                if cur.offset() != body_start + attr_len {
                    return Err(PlanError::format_at(
                        body_start,
                        "Code attribute length disagrees with its contents",
                    ));
                }
            } else {
                cur.skip(attr_len)?;
            }
        }

        table.names.push(interner.get_or_intern(cp.utf8(file, name_idx)?));
        table
            .descriptors
            .push(interner.get_or_intern(cp.utf8(file, desc_idx)?));
        table.access_flags.push(access);
        table.info_offsets.push(info_off as u32);
        table.info_lens.push((cur.offset() - info_off) as u32);
        table.code_offsets.push(code_off);
        table.code_lens.push(code_len);
        table.exc_table_offsets.push(exc_off);
    }
    Ok(table)
}
