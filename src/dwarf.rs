use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Context, Result};

use crate::elf::Elf;

pub type DwarfTag = u64;
pub type DwarfAttr = u64;
pub type DwarfForm = u64;

pub const DW_TAG_COMPILE_UNIT: DwarfTag = 0x11;
pub const DW_TAG_SUBPROGRAM: DwarfTag = 0x2e;
pub const DW_TAG_VARIABLE: DwarfTag = 0x34;

// DW_AT_* constants (subset)
pub const DW_AT_LOCATION: DwarfAttr = 0x02;
pub const DW_AT_NAME: DwarfAttr = 0x03;
pub const DW_AT_STMT_LIST: DwarfAttr = 0x10;
pub const DW_AT_LOW_PC: DwarfAttr = 0x11;
pub const DW_AT_HIGH_PC: DwarfAttr = 0x12;
pub const DW_AT_RANGES: DwarfAttr = 0x55;
pub const DW_AT_LINKAGE_NAME: DwarfAttr = 0x6e;

// DW_FORM_* constants (subset)
pub const DW_FORM_ADDR: DwarfForm = 0x01;
pub const DW_FORM_BLOCK2: DwarfForm = 0x03;
pub const DW_FORM_BLOCK4: DwarfForm = 0x04;
pub const DW_FORM_DATA2: DwarfForm = 0x05;
pub const DW_FORM_DATA4: DwarfForm = 0x06;
pub const DW_FORM_DATA8: DwarfForm = 0x07;
pub const DW_FORM_STRING: DwarfForm = 0x08;
pub const DW_FORM_BLOCK: DwarfForm = 0x09;
pub const DW_FORM_BLOCK1: DwarfForm = 0x0a;
pub const DW_FORM_DATA1: DwarfForm = 0x0b;
pub const DW_FORM_FLAG: DwarfForm = 0x0c;
pub const DW_FORM_SDATA: DwarfForm = 0x0d;
pub const DW_FORM_STRP: DwarfForm = 0x0e;
pub const DW_FORM_UDATA: DwarfForm = 0x0f;
pub const DW_FORM_REF_ADDR: DwarfForm = 0x10;
pub const DW_FORM_REF1: DwarfForm = 0x11;
pub const DW_FORM_REF2: DwarfForm = 0x12;
pub const DW_FORM_REF4: DwarfForm = 0x13;
pub const DW_FORM_REF8: DwarfForm = 0x14;
pub const DW_FORM_REF_UDATA: DwarfForm = 0x15;
pub const DW_FORM_INDIRECT: DwarfForm = 0x16;
pub const DW_FORM_SEC_OFFSET: DwarfForm = 0x17;
pub const DW_FORM_EXPRLOC: DwarfForm = 0x18;
pub const DW_FORM_FLAG_PRESENT: DwarfForm = 0x19;
pub const DW_FORM_REF_SIG8: DwarfForm = 0x20;

// Line-number program opcodes
const DW_LNS_COPY: u8 = 0x01;
const DW_LNS_ADVANCE_PC: u8 = 0x02;
const DW_LNS_ADVANCE_LINE: u8 = 0x03;
const DW_LNS_SET_FILE: u8 = 0x04;
const DW_LNS_SET_COLUMN: u8 = 0x05;
const DW_LNS_NEGATE_STMT: u8 = 0x06;
const DW_LNS_SET_BASIC_BLOCK: u8 = 0x07;
const DW_LNS_CONST_ADD_PC: u8 = 0x08;
const DW_LNS_FIXED_ADVANCE_PC: u8 = 0x09;
const DW_LNS_SET_PROLOGUE_END: u8 = 0x0a;
const DW_LNS_SET_EPILOGUE_BEGIN: u8 = 0x0b;
const DW_LNS_SET_ISA: u8 = 0x0c;

const DW_LNE_END_SEQUENCE: u8 = 0x01;
const DW_LNE_SET_ADDRESS: u8 = 0x02;
const DW_LNE_SET_DISCRIMINATOR: u8 = 0x04;

// Location expression opcodes
const DW_OP_ADDR: u8 = 0x03;
const DW_OP_REG0: u8 = 0x50;
const DW_OP_REG31: u8 = 0x6f;
const DW_OP_BREG0: u8 = 0x70;
const DW_OP_BREG31: u8 = 0x8f;
const DW_OP_FBREG: u8 = 0x91;

/// Forward-only reader over a byte slice. All multi-byte reads are
/// little-endian; every read is bounds-checked against the slice end.
#[derive(Clone, Copy)]
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn advance(&mut self, amount: usize) -> Result<()> {
        if self.pos + amount > self.data.len() {
            bail!("cursor advanced past end of data");
        }
        self.pos += amount;
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            bail!("unexpected end of data");
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub(crate) fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub(crate) fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            bail!("unexpected end of data while reading {n} bytes");
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    pub(crate) fn read_uleb128(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                bail!("ULEB128 value wider than 64 bits");
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(result)
    }

    pub(crate) fn read_sleb128(&mut self) -> Result<i64> {
        let mut result = 0i64;
        let mut shift = 0u32;
        let mut byte;
        loop {
            byte = self.read_u8()?;
            if shift >= 64 {
                bail!("SLEB128 value wider than 64 bits");
            }
            result |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        // Sign bit is the second-highest bit of the final byte.
        if shift < 64 && (byte & 0x40) != 0 {
            result |= -1i64 << shift;
        }
        Ok(result)
    }

    /// Read a null-terminated string, leaving the cursor past the terminator.
    pub(crate) fn read_str(&mut self) -> Result<&'a str> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.data.len() {
            bail!("unterminated string in DWARF data");
        }
        let bytes = &self.data[start..self.pos];
        self.pos += 1;
        std::str::from_utf8(bytes).context("invalid UTF-8 in DWARF string")
    }

    /// Advance past one attribute value of the given form without
    /// interpreting it. `is_64bit` selects the width of section offsets.
    pub(crate) fn skip_form(&mut self, form: DwarfForm, is_64bit: bool) -> Result<()> {
        match form {
            DW_FORM_FLAG_PRESENT => {}
            DW_FORM_DATA1 | DW_FORM_REF1 | DW_FORM_FLAG => self.advance(1)?,
            DW_FORM_DATA2 | DW_FORM_REF2 => self.advance(2)?,
            DW_FORM_DATA4 | DW_FORM_REF4 => self.advance(4)?,
            DW_FORM_DATA8 | DW_FORM_REF8 | DW_FORM_ADDR => self.advance(8)?,
            DW_FORM_STRP | DW_FORM_REF_ADDR | DW_FORM_SEC_OFFSET => {
                self.advance(if is_64bit { 8 } else { 4 })?;
            }
            DW_FORM_SDATA => {
                let _ = self.read_sleb128()?;
            }
            DW_FORM_UDATA | DW_FORM_REF_UDATA => {
                let _ = self.read_uleb128()?;
            }
            DW_FORM_STRING => {
                let _ = self.read_str()?;
            }
            DW_FORM_BLOCK | DW_FORM_EXPRLOC => {
                let size = self.read_uleb128()? as usize;
                self.advance(size)?;
            }
            DW_FORM_BLOCK1 => {
                let size = self.read_u8()? as usize;
                self.advance(size)?;
            }
            DW_FORM_BLOCK2 => {
                let size = self.read_u16()? as usize;
                self.advance(size)?;
            }
            DW_FORM_BLOCK4 => {
                let size = self.read_u32()? as usize;
                self.advance(size)?;
            }
            _ => bail!("unsupported DWARF form {form:#x}"),
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct AttrSpec {
    pub attr: DwarfAttr,
    pub form: DwarfForm,
}

#[derive(Clone, Debug)]
pub struct Abbrev {
    pub code: u64,
    pub tag: DwarfTag,
    pub has_children: bool,
    pub attr_specs: Vec<AttrSpec>,
}

/// Parse the abbreviation table starting at `offset` in `.debug_abbrev`.
/// The table ends at the first zero abbreviation code.
fn parse_abbrev_table(data: &[u8], offset: usize) -> Result<HashMap<u64, Abbrev>> {
    if offset >= data.len() {
        bail!("abbreviation table offset {offset:#x} outside .debug_abbrev");
    }
    let mut table = HashMap::new();
    let mut cur = Cursor::new(&data[offset..]);
    loop {
        let code = cur.read_uleb128()?;
        if code == 0 {
            break;
        }
        let tag = cur.read_uleb128()?;
        let has_children = cur.read_u8()? != 0;
        let mut attr_specs = Vec::new();
        loop {
            let attr = cur.read_uleb128()?;
            let form = cur.read_uleb128()?;
            if attr == 0 && form == 0 {
                break;
            }
            attr_specs.push(AttrSpec { attr, form });
        }
        table.insert(
            code,
            Abbrev {
                code,
                tag,
                has_children,
                attr_specs,
            },
        );
    }
    Ok(table)
}

/// One compile unit of `.debug_info`. `offset`/`size` locate the whole unit
/// (header included) within the section; the first DIE starts at
/// `offset + header_size`.
#[derive(Clone, Debug)]
pub struct CompileUnit {
    index: usize,
    offset: usize,
    size: usize,
    header_size: usize,
    is_64bit: bool,
    version: u16,
    abbrev_offset: u64,
    address_size: u8,
}

impl CompileUnit {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn total_size(&self) -> usize {
        self.size
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn address_size(&self) -> u8 {
        self.address_size
    }
}

/// Zero-copy view of a single attribute: the form plus the offset of its
/// value bytes within the owning compile unit. Interpretation is deferred
/// to the projection methods.
#[derive(Clone)]
pub struct Attr<'d> {
    dwarf: &'d Dwarf,
    cu: &'d CompileUnit,
    name: DwarfAttr,
    form: DwarfForm,
    location: usize,
}

impl<'d> Attr<'d> {
    pub fn name(&self) -> DwarfAttr {
        self.name
    }

    pub fn form(&self) -> DwarfForm {
        self.form
    }

    fn value_cursor(&self) -> Result<Cursor<'d>> {
        let data = self.dwarf.cu_data(self.cu);
        if self.location >= data.len() {
            bail!("attribute value outside compile unit bounds");
        }
        Ok(Cursor::new(&data[self.location..]))
    }

    pub fn as_u64(&self) -> Result<u64> {
        let mut cur = self.value_cursor()?;
        Ok(match self.form {
            DW_FORM_ADDR | DW_FORM_DATA8 | DW_FORM_REF8 => cur.read_u64()?,
            DW_FORM_DATA1 | DW_FORM_REF1 | DW_FORM_FLAG => u64::from(cur.read_u8()?),
            DW_FORM_DATA2 | DW_FORM_REF2 => u64::from(cur.read_u16()?),
            DW_FORM_DATA4 | DW_FORM_REF4 => u64::from(cur.read_u32()?),
            DW_FORM_STRP | DW_FORM_SEC_OFFSET | DW_FORM_REF_ADDR => {
                if self.cu.is_64bit {
                    cur.read_u64()?
                } else {
                    u64::from(cur.read_u32()?)
                }
            }
            DW_FORM_UDATA | DW_FORM_REF_UDATA => cur.read_uleb128()?,
            _ => bail!("DWARF form {:#x} has no integer projection", self.form),
        })
    }

    pub fn as_i64(&self) -> Result<i64> {
        if self.form == DW_FORM_SDATA {
            return self.value_cursor()?.read_sleb128();
        }
        Ok(self.as_u64()? as i64)
    }

    pub fn as_str(&self) -> Result<&'d str> {
        let mut cur = self.value_cursor()?;
        match self.form {
            DW_FORM_STRING => cur.read_str(),
            DW_FORM_STRP => {
                let offset = if self.cu.is_64bit {
                    cur.read_u64()? as usize
                } else {
                    cur.read_u32()? as usize
                };
                let strings: &'d [u8] = &self.dwarf.sections.debug_str;
                if offset >= strings.len() {
                    bail!(".debug_str offset {offset:#x} out of bounds");
                }
                Cursor::new(&strings[offset..]).read_str()
            }
            _ => bail!("DWARF form {:#x} has no string projection", self.form),
        }
    }

    /// The raw bytes of a `DW_FORM_exprloc` value, without the length prefix.
    pub fn as_exprloc(&self) -> Result<&'d [u8]> {
        if self.form != DW_FORM_EXPRLOC {
            bail!("DWARF form {:#x} is not a location expression", self.form);
        }
        let mut cur = self.value_cursor()?;
        let size = cur.read_uleb128()? as usize;
        cur.read_bytes(size)
    }
}

/// Cursor over one debug information entry. `position`/`next_offset` are
/// offsets within the owning compile unit; a null entry (abbreviation code
/// zero) carries no abbreviation and marks the end of a sibling chain.
#[derive(Clone)]
pub struct Die<'d> {
    dwarf: &'d Dwarf,
    cu: &'d CompileUnit,
    position: usize,
    next_offset: usize,
    abbrev: Option<&'d Abbrev>,
    attr_locs: Vec<usize>,
}

impl fmt::Debug for Die<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Die")
            .field("cu", &self.cu.index)
            .field("position", &self.position)
            .field("tag", &self.tag())
            .finish()
    }
}

impl<'d> Die<'d> {
    pub fn cu(&self) -> &'d CompileUnit {
        self.cu
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    pub fn is_null(&self) -> bool {
        self.abbrev.is_none()
    }

    pub fn tag(&self) -> Option<DwarfTag> {
        self.abbrev.map(|a| a.tag)
    }

    pub fn has_children(&self) -> bool {
        self.abbrev.is_some_and(|a| a.has_children)
    }

    pub fn contains(&self, name: DwarfAttr) -> bool {
        self.abbrev
            .is_some_and(|a| a.attr_specs.iter().any(|spec| spec.attr == name))
    }

    pub fn attr(&self, name: DwarfAttr) -> Option<Attr<'d>> {
        let abbrev = self.abbrev?;
        let index = abbrev.attr_specs.iter().position(|spec| spec.attr == name)?;
        Some(Attr {
            dwarf: self.dwarf,
            cu: self.cu,
            name,
            form: abbrev.attr_specs[index].form,
            location: self.attr_locs[index],
        })
    }

    /// `DW_AT_name`, falling back to `DW_AT_linkage_name`.
    pub fn name(&self) -> Result<Option<&'d str>> {
        for attr_name in [DW_AT_NAME, DW_AT_LINKAGE_NAME] {
            if let Some(attr) = self.attr(attr_name) {
                return attr.as_str().map(Some);
            }
        }
        Ok(None)
    }

    /// The entry after this one in the flat DIE stream, or `None` at the end
    /// of the compile unit. Null entries are returned like any other so
    /// callers can track sibling-chain depth.
    pub fn advance(&self) -> Result<Option<Die<'d>>> {
        if self.next_offset >= self.cu.size {
            return Ok(None);
        }
        self.dwarf.die_at(self.cu, self.next_offset).map(Some)
    }

    /// All descendants of this entry, in stream order, null entries
    /// excluded. Depth is tracked with the abbreviation `has_children`
    /// flags: a children-bearing entry descends one level, a null entry
    /// closes one.
    pub fn nested(&self) -> Result<Vec<Die<'d>>> {
        if !self.has_children() {
            return Ok(Vec::new());
        }
        let mut collected = Vec::new();
        let mut depth = 1usize;
        let mut offset = self.next_offset;
        while offset < self.cu.size {
            let die = self.dwarf.die_at(self.cu, offset)?;
            offset = die.next_offset;
            if die.is_null() {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            } else {
                if die.has_children() {
                    depth += 1;
                }
                collected.push(die);
            }
        }
        Ok(collected)
    }
}

/// Decoded storage for a variable or frame base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DwarfLocation {
    /// The value lives in a register (`offset == None`), or in memory at
    /// register + offset.
    Register { register: u16, offset: Option<i64> },
    /// The value lives at frame base + offset.
    FrameBase { offset: i64 },
    /// The value lives at a fixed address.
    Address { address: u64 },
}

/// Decode the leading opcode of a single location expression. Only the
/// register, base-register, frame-base, and absolute-address encodings are
/// understood; everything else is an error the caller surfaces.
pub fn decode_location(expression: &[u8]) -> Result<DwarfLocation> {
    let mut cur = Cursor::new(expression);
    let opcode = cur.read_u8()?;
    match opcode {
        DW_OP_ADDR => Ok(DwarfLocation::Address {
            address: cur.read_u64()?,
        }),
        DW_OP_REG0..=DW_OP_REG31 => Ok(DwarfLocation::Register {
            register: u16::from(opcode - DW_OP_REG0),
            offset: None,
        }),
        DW_OP_BREG0..=DW_OP_BREG31 => {
            let offset = cur.read_sleb128()?;
            Ok(DwarfLocation::Register {
                register: u16::from(opcode - DW_OP_BREG0),
                offset: Some(offset),
            })
        }
        DW_OP_FBREG => Ok(DwarfLocation::FrameBase {
            offset: cur.read_sleb128()?,
        }),
        _ => bail!("unsupported DWARF location opcode {opcode:#x}"),
    }
}

/// One materialized row of a line-number table. `file` borrows from the
/// program header's file-name table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineRow<'d> {
    pub address: u64,
    pub file: &'d str,
    pub line: u64,
    pub column: u64,
    pub is_stmt: bool,
    pub basic_block: bool,
    pub end_sequence: bool,
    pub prologue_end: bool,
    pub epilogue_begin: bool,
    pub discriminator: u64,
}

#[derive(Clone)]
struct LineRegisters {
    address: u64,
    op_index: u64,
    file: u64,
    line: u64,
    column: u64,
    is_stmt: bool,
    basic_block: bool,
    end_sequence: bool,
    prologue_end: bool,
    epilogue_begin: bool,
    discriminator: u64,
}

impl LineRegisters {
    fn new(default_is_stmt: bool) -> Self {
        Self {
            address: 0,
            op_index: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
            basic_block: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            discriminator: 0,
        }
    }
}

/// A parsed line-number program header plus its opcode stream. `run`
/// interprets the stream and materializes the full row table; the program
/// itself is never mutated, so a `LineProgram` can be run repeatedly.
pub struct LineProgram<'d> {
    version: u16,
    minimum_instruction_length: u8,
    maximum_operations_per_instruction: u8,
    default_is_stmt: bool,
    line_base: i8,
    line_range: u8,
    opcode_base: u8,
    include_directories: Vec<&'d str>,
    file_names: Vec<&'d str>,
    program: &'d [u8],
}

impl<'d> LineProgram<'d> {
    /// Parse the header of the line-number program at `offset` in
    /// `.debug_line`.
    pub fn parse(debug_line: &'d [u8], offset: usize) -> Result<Self> {
        if offset >= debug_line.len() {
            bail!("line program offset {offset:#x} outside .debug_line");
        }
        let data = &debug_line[offset..];
        let mut cur = Cursor::new(data);

        let mut is_64bit = false;
        let first_word = cur.read_u32()?;
        let unit_length = if first_word == 0xffff_ffff {
            is_64bit = true;
            cur.read_u64()? as usize
        } else {
            first_word as usize
        };
        let unit_end = unit_length + if is_64bit { 12 } else { 4 };
        if unit_end > data.len() {
            bail!("line program extends past end of .debug_line");
        }

        let version = cur.read_u16()?;
        if !(2..=4).contains(&version) {
            bail!("unsupported line table version {version}");
        }
        let header_length = if is_64bit {
            cur.read_u64()? as usize
        } else {
            cur.read_u32()? as usize
        };
        let header_end = cur.position() + header_length;
        if header_end > unit_end {
            bail!("line program header extends past end of unit");
        }

        let minimum_instruction_length = cur.read_u8()?;
        let maximum_operations_per_instruction = if version >= 4 { cur.read_u8()? } else { 1 };
        if maximum_operations_per_instruction == 0 {
            bail!("invalid maximum operations per instruction");
        }
        let default_is_stmt = cur.read_u8()? != 0;
        let line_base = cur.read_i8()?;
        let line_range = cur.read_u8()?;
        if line_range == 0 {
            bail!("invalid line range");
        }
        let opcode_base = cur.read_u8()?;

        // Standard opcode operand counts; sizes are implied by the opcodes
        // themselves, so the table is skipped.
        cur.advance(opcode_base.saturating_sub(1) as usize)?;

        let mut include_directories = Vec::new();
        while cur.position() < header_end {
            let dir = cur.read_str()?;
            if dir.is_empty() {
                break;
            }
            include_directories.push(dir);
        }

        let mut file_names = Vec::new();
        while cur.position() < header_end {
            let name = cur.read_str()?;
            if name.is_empty() {
                break;
            }
            let _directory_index = cur.read_uleb128()?;
            let _modification_time = cur.read_uleb128()?;
            let _file_length = cur.read_uleb128()?;
            file_names.push(name);
        }

        if cur.position() < header_end {
            cur.advance(header_end - cur.position())?;
        }

        Ok(Self {
            version,
            minimum_instruction_length,
            maximum_operations_per_instruction,
            default_is_stmt,
            line_base,
            line_range,
            opcode_base,
            include_directories,
            file_names,
            program: &data[header_end..unit_end],
        })
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn file_names(&self) -> &[&'d str] {
        &self.file_names
    }

    pub fn include_directories(&self) -> &[&'d str] {
        &self.include_directories
    }

    fn row_from(&self, registers: &LineRegisters) -> Result<LineRow<'d>> {
        // File numbering is 1-based in DWARF v4.
        let file = registers
            .file
            .checked_sub(1)
            .and_then(|index| self.file_names.get(index as usize).copied())
            .with_context(|| format!("line row references unknown file index {}", registers.file))?;
        Ok(LineRow {
            address: registers.address,
            file,
            line: registers.line,
            column: registers.column,
            is_stmt: registers.is_stmt,
            basic_block: registers.basic_block,
            end_sequence: registers.end_sequence,
            prologue_end: registers.prologue_end,
            epilogue_begin: registers.epilogue_begin,
            discriminator: registers.discriminator,
        })
    }

    /// Interpret the opcode stream and return the materialized table.
    pub fn run(&self) -> Result<Vec<LineRow<'d>>> {
        let mut rows = Vec::new();
        let mut registers = LineRegisters::new(self.default_is_stmt);
        let mut cur = Cursor::new(self.program);

        while !cur.is_finished() {
            let opcode = cur.read_u8()?;

            if opcode == 0 {
                // Extended opcode: ULEB length, then a one-byte sub-opcode.
                let length = cur.read_uleb128()? as usize;
                let start = cur.position();
                let extended = cur.read_u8()?;
                match extended {
                    DW_LNE_END_SEQUENCE => {
                        registers.end_sequence = true;
                        rows.push(self.row_from(&registers)?);
                        registers = LineRegisters::new(self.default_is_stmt);
                    }
                    DW_LNE_SET_ADDRESS => {
                        registers.address = cur.read_u64()?;
                        registers.op_index = 0;
                    }
                    DW_LNE_SET_DISCRIMINATOR => {
                        registers.discriminator = cur.read_uleb128()?;
                    }
                    _ => bail!("unsupported extended line opcode {extended:#x}"),
                }
                let consumed = cur.position() - start;
                if consumed < length {
                    cur.advance(length - consumed)?;
                }
                continue;
            }

            if opcode >= self.opcode_base {
                // Special opcode: combined address and line advance, emit.
                let adjusted = opcode - self.opcode_base;
                let address_advance =
                    u64::from(adjusted / self.line_range) * u64::from(self.minimum_instruction_length);
                let line_advance =
                    i64::from(self.line_base) + i64::from(adjusted % self.line_range);
                registers.address = registers.address.wrapping_add(address_advance);
                registers.line = (registers.line as i64).wrapping_add(line_advance) as u64;
                rows.push(self.row_from(&registers)?);
                registers.basic_block = false;
                registers.prologue_end = false;
                registers.epilogue_begin = false;
                registers.discriminator = 0;
                continue;
            }

            match opcode {
                DW_LNS_COPY => {
                    rows.push(self.row_from(&registers)?);
                    registers.basic_block = false;
                    registers.prologue_end = false;
                    registers.epilogue_begin = false;
                    registers.discriminator = 0;
                }
                DW_LNS_ADVANCE_PC => {
                    let operation_advance = cur.read_uleb128()?;
                    let max_ops = u64::from(self.maximum_operations_per_instruction);
                    registers.address = registers.address.wrapping_add(
                        u64::from(self.minimum_instruction_length)
                            * ((registers.op_index + operation_advance) / max_ops),
                    );
                    registers.op_index = (registers.op_index + operation_advance) % max_ops;
                }
                DW_LNS_ADVANCE_LINE => {
                    let advance = cur.read_sleb128()?;
                    registers.line = (registers.line as i64).wrapping_add(advance) as u64;
                }
                DW_LNS_SET_FILE => {
                    registers.file = cur.read_uleb128()?;
                }
                DW_LNS_SET_COLUMN => {
                    registers.column = cur.read_uleb128()?;
                }
                DW_LNS_NEGATE_STMT => {
                    registers.is_stmt = !registers.is_stmt;
                }
                DW_LNS_SET_BASIC_BLOCK => {
                    registers.basic_block = true;
                }
                DW_LNS_CONST_ADD_PC => {
                    // Advance as special opcode 255 would, without emitting.
                    let adjusted = 255 - self.opcode_base;
                    registers.address = registers.address.wrapping_add(
                        u64::from(adjusted / self.line_range)
                            * u64::from(self.minimum_instruction_length),
                    );
                }
                DW_LNS_FIXED_ADVANCE_PC => {
                    registers.address = registers.address.wrapping_add(u64::from(cur.read_u16()?));
                    registers.op_index = 0;
                }
                DW_LNS_SET_PROLOGUE_END => {
                    registers.prologue_end = true;
                }
                DW_LNS_SET_EPILOGUE_BEGIN => {
                    registers.epilogue_begin = true;
                }
                DW_LNS_SET_ISA => {
                    let _ = cur.read_uleb128()?;
                }
                _ => bail!("unexpected standard line opcode {opcode:#x}"),
            }
        }

        Ok(rows)
    }
}

/// A source position resolved from the line table. `file` borrows from the
/// owning `Dwarf`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceLocation<'d> {
    pub address: u64,
    pub line: u64,
    pub file: &'d str,
    pub is_stmt: bool,
    pub prologue_end: bool,
}

/// Owned copies of the debug sections a `Dwarf` interprets. `debug_ranges`
/// may be empty; the others are required.
#[derive(Default)]
pub struct DwarfSections {
    pub debug_info: Vec<u8>,
    pub debug_abbrev: Vec<u8>,
    pub debug_line: Vec<u8>,
    pub debug_str: Vec<u8>,
    pub debug_ranges: Vec<u8>,
}

/// The debug-information facade. Owns its section buffers and the parsed
/// compile-unit index; DIE cursors and attribute views borrow from it.
pub struct Dwarf {
    sections: DwarfSections,
    compile_units: Vec<CompileUnit>,
    abbrev_tables: HashMap<u64, HashMap<u64, Abbrev>>,
}

impl Dwarf {
    pub fn load(elf: &Elf) -> Result<Self> {
        let sections = DwarfSections {
            debug_info: elf.section_bytes(".debug_info")?,
            debug_abbrev: elf.section_bytes(".debug_abbrev")?,
            debug_line: elf.section_bytes(".debug_line")?,
            debug_str: elf.section_bytes(".debug_str")?,
            // A target with no non-contiguous ranges has no .debug_ranges.
            debug_ranges: elf.section_bytes(".debug_ranges").unwrap_or_default(),
        };
        Self::from_sections(sections)
    }

    pub fn from_sections(sections: DwarfSections) -> Result<Self> {
        let mut dwarf = Self {
            sections,
            compile_units: Vec::new(),
            abbrev_tables: HashMap::new(),
        };
        dwarf.parse_compile_units()?;
        Ok(dwarf)
    }

    fn parse_compile_units(&mut self) -> Result<()> {
        let mut offset = 0usize;
        let mut index = 0usize;
        while offset < self.sections.debug_info.len() {
            let mut cur = Cursor::new(&self.sections.debug_info[offset..]);

            let mut is_64bit = false;
            let first_word = cur.read_u32()?;
            let unit_length = if first_word == 0xffff_ffff {
                is_64bit = true;
                cur.read_u64()? as usize
            } else {
                first_word as usize
            };
            let version = cur.read_u16()?;
            if version != 4 {
                bail!("only DWARF v4 is supported (compile unit has version {version})");
            }
            let abbrev_offset = if is_64bit {
                cur.read_u64()?
            } else {
                u64::from(cur.read_u32()?)
            };
            let address_size = cur.read_u8()?;
            if address_size != 8 {
                bail!("unsupported address size {address_size}");
            }
            let header_size = cur.position();

            let total_size = unit_length + if is_64bit { 12 } else { 4 };
            if offset + total_size > self.sections.debug_info.len() {
                bail!("compile unit extends past end of .debug_info");
            }

            if !self.abbrev_tables.contains_key(&abbrev_offset) {
                let table = parse_abbrev_table(&self.sections.debug_abbrev, abbrev_offset as usize)?;
                self.abbrev_tables.insert(abbrev_offset, table);
            }

            self.compile_units.push(CompileUnit {
                index,
                offset,
                size: total_size,
                header_size,
                is_64bit,
                version,
                abbrev_offset,
                address_size,
            });
            offset += total_size;
            index += 1;
        }
        Ok(())
    }

    pub fn compile_units(&self) -> &[CompileUnit] {
        &self.compile_units
    }

    fn cu_data<'d>(&'d self, cu: &CompileUnit) -> &'d [u8] {
        &self.sections.debug_info[cu.offset..cu.offset + cu.size]
    }

    /// The first DIE after the compile-unit header; its tag is expected to
    /// be `DW_TAG_compile_unit`.
    pub fn root<'d>(&'d self, cu: &'d CompileUnit) -> Result<Die<'d>> {
        self.die_at(cu, cu.header_size)
    }

    /// Decode the DIE at `offset` within `cu`: read the abbreviation code,
    /// resolve it, and record where each attribute's value bytes start by
    /// replaying form-sized skips.
    fn die_at<'d>(&'d self, cu: &'d CompileUnit, offset: usize) -> Result<Die<'d>> {
        let data = self.cu_data(cu);
        if offset >= data.len() {
            bail!("DIE offset {offset:#x} outside compile unit");
        }
        let mut cur = Cursor::new(&data[offset..]);
        let code = cur.read_uleb128()?;
        if code == 0 {
            return Ok(Die {
                dwarf: self,
                cu,
                position: offset,
                next_offset: offset + cur.position(),
                abbrev: None,
                attr_locs: Vec::new(),
            });
        }
        let abbrev = self
            .abbrev_tables
            .get(&cu.abbrev_offset)
            .and_then(|table| table.get(&code))
            .with_context(|| format!("abbreviation code {code} missing from table"))?;
        let mut attr_locs = Vec::with_capacity(abbrev.attr_specs.len());
        for spec in &abbrev.attr_specs {
            attr_locs.push(offset + cur.position());
            cur.skip_form(spec.form, cu.is_64bit)?;
        }
        Ok(Die {
            dwarf: self,
            cu,
            position: offset,
            next_offset: offset + cur.position(),
            abbrev: Some(abbrev),
            attr_locs,
        })
    }

    /// Every non-null DIE with the given tag, in section order, across all
    /// compile units.
    fn dies_with_tag(&self, tag: DwarfTag) -> Result<Vec<Die<'_>>> {
        let mut found = Vec::new();
        for cu in &self.compile_units {
            let mut offset = cu.header_size;
            while offset < cu.size {
                let die = self.die_at(cu, offset)?;
                offset = die.next_offset;
                if die.tag() == Some(tag) {
                    found.push(die);
                }
            }
        }
        Ok(found)
    }

    /// `[low_pc, high_pc)` bounds of a subprogram DIE, honoring the
    /// `high_pc` form: an address form is absolute, anything else is a byte
    /// offset from `low_pc`. `None` when either attribute is missing.
    fn subprogram_bounds(die: &Die<'_>) -> Result<Option<(u64, u64)>> {
        let (Some(low_attr), Some(high_attr)) = (die.attr(DW_AT_LOW_PC), die.attr(DW_AT_HIGH_PC))
        else {
            return Ok(None);
        };
        let low = low_attr.as_u64()?;
        let high = if high_attr.form() == DW_FORM_ADDR {
            high_attr.as_u64()?
        } else {
            low + high_attr.as_u64()?
        };
        Ok(Some((low, high)))
    }

    /// Whether `cu` covers `pc`, either through the root's
    /// `low_pc`/`high_pc` pair (half-open interval) or through its
    /// `.debug_ranges` list (closed intervals, terminated by a zero pair).
    fn cu_contains_pc(&self, cu: &CompileUnit, pc: u64) -> Result<bool> {
        let root = self.root(cu)?;
        if let Some((low, high)) = Self::subprogram_bounds(&root)? {
            return Ok(low <= pc && pc < high);
        }
        let Some(ranges_attr) = root.attr(DW_AT_RANGES) else {
            return Ok(false);
        };
        let offset = ranges_attr.as_u64()? as usize;
        if offset >= self.sections.debug_ranges.len() {
            bail!("range list offset {offset:#x} outside .debug_ranges");
        }
        let mut cur = Cursor::new(&self.sections.debug_ranges[offset..]);
        let mut base = 0u64;
        loop {
            let start = cur.read_u64()?;
            let end = cur.read_u64()?;
            if start == 0 && end == 0 {
                return Ok(false);
            }
            // A start of all ones selects a new base for later entries.
            if start == u64::MAX {
                base = end;
                continue;
            }
            if base.wrapping_add(start) <= pc && pc <= base.wrapping_add(end) {
                return Ok(true);
            }
        }
    }

    /// The compile unit whose address range covers `pc`, if any.
    pub fn compile_unit_containing_pc(&self, pc: u64) -> Result<Option<&CompileUnit>> {
        for cu in &self.compile_units {
            if self.cu_contains_pc(cu, pc)? {
                return Ok(Some(cu));
            }
        }
        Ok(None)
    }

    /// Parse and run the line-number program named by the root DIE's
    /// `stmt_list`, if the compile unit has one.
    fn line_rows(&self, cu: &CompileUnit) -> Result<Option<Vec<LineRow<'_>>>> {
        let root = self.root(cu)?;
        let Some(stmt_list) = root.attr(DW_AT_STMT_LIST) else {
            return Ok(None);
        };
        let offset = stmt_list.as_u64()? as usize;
        let program = LineProgram::parse(&self.sections.debug_line, offset)?;
        program.run().map(Some)
    }

    /// The source location of the named function: the first `subprogram`
    /// DIE whose name matches exactly supplies the entry PC, which is then
    /// resolved with prologue skipping.
    pub fn source_location_from_function(&self, function: &str) -> Result<Option<SourceLocation<'_>>> {
        let mut address = None;
        for die in self.dies_with_tag(DW_TAG_SUBPROGRAM)? {
            let Some(name_attr) = die.attr(DW_AT_NAME) else {
                continue;
            };
            if name_attr.as_str()? != function {
                continue;
            }
            if let Some(low_pc) = die.attr(DW_AT_LOW_PC) {
                address = Some(low_pc.as_u64()?);
                break;
            }
        }
        match address {
            Some(pc) => self.source_location_from_pc(pc, true),
            None => Ok(None),
        }
    }

    /// The PC of the statement row closest to `line` of `file`. The compile
    /// unit is selected by its root name; among rows of `file` flagged
    /// `is_stmt`, the smallest line distance wins, earliest row on ties. If
    /// the following row ends the prologue, its address is used instead.
    pub fn pc_from_line_and_file(&self, line: u64, file: &str) -> Result<Option<u64>> {
        let Some(offset) = self.line_offset_for_file(file)? else {
            return Ok(None);
        };
        let program = LineProgram::parse(&self.sections.debug_line, offset)?;
        let rows = program.run()?;

        let mut best_match: Option<usize> = None;
        let mut min_distance = i64::MAX;
        for (index, row) in rows.iter().enumerate() {
            if row.file != file || !row.is_stmt {
                continue;
            }
            let distance = (line as i64 - row.line as i64).abs();
            if distance < min_distance {
                best_match = Some(index);
                min_distance = distance;
            }
        }

        let Some(mut best) = best_match else {
            return Ok(None);
        };
        if best + 1 < rows.len() && rows[best + 1].prologue_end {
            best += 1;
        }
        Ok(Some(rows[best].address))
    }

    /// The line-table row covering `pc`: the last row pair with
    /// `rows[i-1].address <= pc < rows[i].address` whose left row does not
    /// end a sequence. With `skip_prologues`, a following prologue-end row
    /// is preferred.
    pub fn source_location_from_pc(
        &self,
        pc: u64,
        skip_prologues: bool,
    ) -> Result<Option<SourceLocation<'_>>> {
        let Some(cu) = self.compile_unit_containing_pc(pc)? else {
            return Ok(None);
        };
        let Some(rows) = self.line_rows(cu)? else {
            return Ok(None);
        };

        let mut best_match: Option<usize> = None;
        for index in 1..rows.len() {
            if rows[index - 1].address <= pc && rows[index].address > pc {
                if rows[index - 1].end_sequence {
                    continue;
                }
                best_match = Some(index - 1);
            }
        }

        let Some(mut best) = best_match else {
            return Ok(None);
        };
        if skip_prologues && best + 1 < rows.len() && rows[best + 1].prologue_end {
            best += 1;
        }
        let row = &rows[best];
        Ok(Some(SourceLocation {
            address: row.address,
            line: row.line,
            file: row.file,
            is_stmt: row.is_stmt,
            prologue_end: row.prologue_end,
        }))
    }

    /// The name of the subprogram whose `[low_pc, high_pc]` interval
    /// contains `pc`.
    pub fn function_from_pc(&self, pc: u64) -> Result<Option<&str>> {
        for die in self.dies_with_tag(DW_TAG_SUBPROGRAM)? {
            let Some((low, high)) = Self::subprogram_bounds(&die)? else {
                continue;
            };
            if low <= pc && pc <= high {
                return die.name();
            }
        }
        Ok(None)
    }

    /// The storage of the named variable in the subprogram containing `pc`.
    /// The variable's DIE is searched among the subprogram's descendants;
    /// its `location` must be a single expression (location lists are not
    /// supported).
    pub fn variable_location(&self, pc: u64, variable: &str) -> Result<Option<DwarfLocation>> {
        let mut subprogram = None;
        for die in self.dies_with_tag(DW_TAG_SUBPROGRAM)? {
            let Some((low, high)) = Self::subprogram_bounds(&die)? else {
                continue;
            };
            if low <= pc && pc <= high {
                subprogram = Some(die);
                break;
            }
        }
        let Some(subprogram) = subprogram else {
            return Ok(None);
        };

        for die in subprogram.nested()? {
            let Some(name_attr) = die.attr(DW_AT_NAME) else {
                continue;
            };
            if name_attr.as_str()? != variable {
                continue;
            }
            let Some(location) = die.attr(DW_AT_LOCATION) else {
                return Ok(None);
            };
            if location.form() != DW_FORM_EXPRLOC {
                bail!("location lists are not supported");
            }
            return decode_location(location.as_exprloc()?).map(Some);
        }
        Ok(None)
    }

    /// The `stmt_list` offset of the compile unit whose root name matches
    /// `file`.
    fn line_offset_for_file(&self, file: &str) -> Result<Option<usize>> {
        for die in self.dies_with_tag(DW_TAG_COMPILE_UNIT)? {
            let Some(name_attr) = die.attr(DW_AT_NAME) else {
                continue;
            };
            if name_attr.as_str()? != file {
                continue;
            }
            let Some(stmt_list) = die.attr(DW_AT_STMT_LIST) else {
                return Ok(None);
            };
            return Ok(Some(stmt_list.as_u64()? as usize));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_uleb128(mut value: u64) -> Vec<u8> {
        let mut bytes = Vec::new();
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            bytes.push(byte);
            if value == 0 {
                break;
            }
        }
        bytes
    }

    fn encode_sleb128(mut value: i64) -> Vec<u8> {
        let mut bytes = Vec::new();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let sign = byte & 0x40 != 0;
            let done = (value == 0 && !sign) || (value == -1 && sign);
            bytes.push(if done { byte } else { byte | 0x80 });
            if done {
                break;
            }
        }
        bytes
    }

    #[test]
    fn uleb128_known_encodings() {
        for (bytes, expected) in [
            (vec![0x00], 0u64),
            (vec![0x7f], 127),
            (vec![0x80, 0x01], 128),
            (vec![0xe5, 0x8e, 0x26], 624_485),
        ] {
            assert_eq!(Cursor::new(&bytes).read_uleb128().unwrap(), expected);
        }
    }

    #[test]
    fn sleb128_known_encodings() {
        for (bytes, expected) in [
            (vec![0x00], 0i64),
            (vec![0x7f], -1),
            (vec![0x40], -64),
            (vec![0xc0, 0xbb, 0x78], -123_456),
        ] {
            assert_eq!(Cursor::new(&bytes).read_sleb128().unwrap(), expected);
        }
    }

    #[test]
    fn leb128_round_trips() {
        for value in [0u64, 1, 0x7f, 0x80, 0x3fff, 0x4000, u64::from(u32::MAX), u64::MAX] {
            let bytes = encode_uleb128(value);
            let mut cur = Cursor::new(&bytes);
            assert_eq!(cur.read_uleb128().unwrap(), value);
            assert!(cur.is_finished());
        }
        for value in [0i64, 1, -1, 63, -64, 64, -65, i64::MAX, i64::MIN] {
            let bytes = encode_sleb128(value);
            let mut cur = Cursor::new(&bytes);
            assert_eq!(cur.read_sleb128().unwrap(), value);
            assert!(cur.is_finished());
        }
    }

    #[test]
    fn skip_form_consumes_exact_sizes() {
        let data = [0u8; 32];
        let fixed = [
            (DW_FORM_FLAG_PRESENT, 0usize),
            (DW_FORM_DATA1, 1),
            (DW_FORM_REF1, 1),
            (DW_FORM_FLAG, 1),
            (DW_FORM_DATA2, 2),
            (DW_FORM_REF2, 2),
            (DW_FORM_DATA4, 4),
            (DW_FORM_REF4, 4),
            (DW_FORM_DATA8, 8),
            (DW_FORM_REF8, 8),
            (DW_FORM_ADDR, 8),
        ];
        for (form, size) in fixed {
            let mut cur = Cursor::new(&data);
            cur.skip_form(form, false).unwrap();
            assert_eq!(cur.position(), size, "form {form:#x}");
        }
        for form in [DW_FORM_STRP, DW_FORM_SEC_OFFSET, DW_FORM_REF_ADDR] {
            let mut cur = Cursor::new(&data);
            cur.skip_form(form, false).unwrap();
            assert_eq!(cur.position(), 4);
            let mut cur = Cursor::new(&data);
            cur.skip_form(form, true).unwrap();
            assert_eq!(cur.position(), 8);
        }
    }

    #[test]
    fn skip_form_length_prefixed_blocks() {
        let block1 = [0x03, 0xaa, 0xbb, 0xcc, 0xdd];
        let mut cur = Cursor::new(&block1);
        cur.skip_form(DW_FORM_BLOCK1, false).unwrap();
        assert_eq!(cur.position(), 4);

        let block2 = [0x02, 0x00, 0xaa, 0xbb, 0xcc];
        let mut cur = Cursor::new(&block2);
        cur.skip_form(DW_FORM_BLOCK2, false).unwrap();
        assert_eq!(cur.position(), 4);

        let exprloc = [0x02, 0x91, 0x6c, 0xff];
        let mut cur = Cursor::new(&exprloc);
        cur.skip_form(DW_FORM_EXPRLOC, false).unwrap();
        assert_eq!(cur.position(), 3);

        let string = [b'h', b'i', 0x00, 0xff];
        let mut cur = Cursor::new(&string);
        cur.skip_form(DW_FORM_STRING, false).unwrap();
        assert_eq!(cur.position(), 3);
    }

    #[test]
    fn skip_form_rejects_unsupported_forms() {
        let data = [0u8; 16];
        for form in [DW_FORM_INDIRECT, DW_FORM_REF_SIG8] {
            assert!(Cursor::new(&data).skip_form(form, false).is_err());
        }
    }

    #[test]
    fn attribute_replay_is_idempotent() {
        // Replaying the skip sequence from the attribute-data start must
        // land on the same byte for any prefix length.
        let forms = [DW_FORM_DATA1, DW_FORM_UDATA, DW_FORM_DATA4, DW_FORM_STRING];
        let mut data = vec![0x2a];
        data.extend(encode_uleb128(624_485));
        data.extend([0x01, 0x02, 0x03, 0x04]);
        data.extend(*b"name\0");

        let mut first_pass = Vec::new();
        let mut cur = Cursor::new(&data);
        for form in forms {
            first_pass.push(cur.position());
            cur.skip_form(form, false).unwrap();
        }
        for (count, expected) in first_pass.iter().enumerate() {
            let mut replay = Cursor::new(&data);
            for form in &forms[..count] {
                replay.skip_form(*form, false).unwrap();
            }
            assert_eq!(replay.position(), *expected);
        }
    }

    #[test]
    fn abbrev_table_lookup() {
        let mut data = Vec::new();
        // Entry 1: compile unit with name/strp, children.
        data.extend([0x01, 0x11, 0x01, 0x03, 0x0e, 0x00, 0x00]);
        // Entry 2: subprogram with low_pc/addr and high_pc/data4, no children.
        data.extend([0x02, 0x2e, 0x00, 0x11, 0x01, 0x12, 0x06, 0x00, 0x00]);
        data.push(0x00);

        let table = parse_abbrev_table(&data, 0).unwrap();
        assert_eq!(table.len(), 2);

        let cu = &table[&1];
        assert_eq!(cu.tag, DW_TAG_COMPILE_UNIT);
        assert!(cu.has_children);
        assert_eq!(cu.attr_specs.len(), 1);
        assert_eq!(cu.attr_specs[0].attr, DW_AT_NAME);
        assert_eq!(cu.attr_specs[0].form, DW_FORM_STRP);

        let subprogram = &table[&2];
        assert_eq!(subprogram.tag, DW_TAG_SUBPROGRAM);
        assert!(!subprogram.has_children);
        assert_eq!(subprogram.attr_specs.len(), 2);
        assert_eq!(subprogram.attr_specs[1].form, DW_FORM_DATA4);
    }

    #[test]
    fn abbrev_table_rejects_bad_offset() {
        assert!(parse_abbrev_table(&[0x00], 5).is_err());
    }

    #[test]
    fn location_register_opcodes() {
        assert_eq!(
            decode_location(&[0x50]).unwrap(),
            DwarfLocation::Register { register: 0, offset: None }
        );
        assert_eq!(
            decode_location(&[0x56]).unwrap(),
            DwarfLocation::Register { register: 6, offset: None }
        );
        assert_eq!(
            decode_location(&[0x6f]).unwrap(),
            DwarfLocation::Register { register: 31, offset: None }
        );
    }

    #[test]
    fn location_base_register_opcodes() {
        let mut expression = vec![0x76];
        expression.extend(encode_sleb128(-8));
        assert_eq!(
            decode_location(&expression).unwrap(),
            DwarfLocation::Register { register: 6, offset: Some(-8) }
        );
    }

    #[test]
    fn location_frame_base_offset() {
        let mut expression = vec![0x91];
        expression.extend(encode_sleb128(-20));
        assert_eq!(
            decode_location(&expression).unwrap(),
            DwarfLocation::FrameBase { offset: -20 }
        );
    }

    #[test]
    fn location_absolute_address() {
        let mut expression = vec![0x03];
        expression.extend(0x601040u64.to_le_bytes());
        assert_eq!(
            decode_location(&expression).unwrap(),
            DwarfLocation::Address { address: 0x601040 }
        );
    }

    #[test]
    fn location_rejects_unsupported_opcodes() {
        // DW_OP_call_frame_cfa and an arithmetic opcode.
        assert!(decode_location(&[0x9c]).is_err());
        assert!(decode_location(&[0x22]).is_err());
        assert!(decode_location(&[]).is_err());
    }
}
