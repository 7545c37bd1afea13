use std::collections::HashMap;
use std::fs::File;
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr;

use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use nix::libc::{Elf64_Ehdr, Elf64_Phdr, Elf64_Shdr, Elf64_Sym};
use rustc_demangle::demangle;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
pub const ET_EXEC: u16 = 2;
const STT_FUNC: u8 = 2;

/// Extract the symbol type from `st_info` (lower 4 bits).
#[inline]
fn elf64_st_type(st_info: u8) -> u8 {
    st_info & 0xf
}

/// Copy a `T` out of `data` at `offset`. The caller guarantees `T` is a
/// plain-old-data ELF structure; the bounds are checked here.
fn read_struct<T: Copy>(data: &[u8], offset: usize) -> Result<T> {
    let size = mem::size_of::<T>();
    if offset + size > data.len() {
        bail!("truncated ELF file: {size} bytes at offset {offset:#x}");
    }
    let mut value = mem::MaybeUninit::<T>::uninit();
    unsafe {
        ptr::copy_nonoverlapping(
            data.as_ptr().add(offset),
            value.as_mut_ptr() as *mut u8,
            size,
        );
        Ok(value.assume_init())
    }
}

/// Read-only view of a 64-bit little-endian ELF executable. The file is
/// memory-mapped once; section payloads are copied out on request so they
/// can outlive lookups into the map.
pub struct Elf {
    pub path: PathBuf,
    mmap: Mmap,
    pub header: Elf64_Ehdr,
    pub program_headers: Vec<Elf64_Phdr>,
    section_headers: Vec<Elf64_Shdr>,
    section_index: HashMap<String, usize>,
    symbols: Vec<Elf64_Sym>,
    symbol_index: HashMap<String, usize>,
    // (start, end, symbol index) for function symbols, sorted by start.
    function_ranges: Vec<(u64, u64, usize)>,
}

impl Elf {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("unable to open target {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file)? };

        let header: Elf64_Ehdr = read_struct(&mmap, 0)?;
        if header.e_ident[..4] != ELF_MAGIC {
            bail!("{} is not an ELF file", path.display());
        }
        if header.e_ident[4] != ELFCLASS64 || header.e_ident[5] != ELFDATA2LSB {
            bail!("{} is not a little-endian 64-bit ELF file", path.display());
        }

        let mut elf = Self {
            path,
            mmap,
            header,
            program_headers: Vec::new(),
            section_headers: Vec::new(),
            section_index: HashMap::new(),
            symbols: Vec::new(),
            symbol_index: HashMap::new(),
            function_ranges: Vec::new(),
        };
        elf.parse_program_headers()?;
        elf.parse_section_headers()?;
        elf.build_section_index()?;
        elf.parse_symbol_table()?;
        Ok(elf)
    }

    fn parse_program_headers(&mut self) -> Result<()> {
        let count = self.header.e_phnum as usize;
        if count == 0 {
            return Ok(());
        }
        if self.header.e_phentsize as usize != mem::size_of::<Elf64_Phdr>() {
            bail!("invalid program header entry size");
        }
        let base = self.header.e_phoff as usize;
        for i in 0..count {
            let phdr: Elf64_Phdr =
                read_struct(&self.mmap, base + i * mem::size_of::<Elf64_Phdr>())?;
            self.program_headers.push(phdr);
        }
        Ok(())
    }

    fn parse_section_headers(&mut self) -> Result<()> {
        let base = self.header.e_shoff as usize;
        let entsize = self.header.e_shentsize as usize;
        let mut count = self.header.e_shnum as usize;

        if count == 0 && entsize != 0 {
            // Extension: the real count lives in sh_size of section 0.
            let first: Elf64_Shdr = read_struct(&self.mmap, base)?;
            count = first.sh_size as usize;
        }
        if count == 0 || entsize != mem::size_of::<Elf64_Shdr>() {
            bail!("invalid section header count or entry size");
        }

        for i in 0..count {
            let shdr: Elf64_Shdr = read_struct(&self.mmap, base + i * entsize)?;
            self.section_headers.push(shdr);
        }
        Ok(())
    }

    fn build_section_index(&mut self) -> Result<()> {
        let shstrndx = self.header.e_shstrndx as usize;
        let strtab = self
            .section_headers
            .get(shstrndx)
            .context("missing section-name string table")?;
        let offset = strtab.sh_offset as usize;
        let size = strtab.sh_size as usize;
        if offset + size > self.mmap.len() {
            bail!("section-name string table extends past end of file");
        }
        let names = &self.mmap[offset..offset + size];

        for (index, section) in self.section_headers.iter().enumerate() {
            let Some(name) = cstr_at(names, section.sh_name as usize) else {
                continue;
            };
            // First section with a given name wins.
            self.section_index.entry(name.to_string()).or_insert(index);
        }
        Ok(())
    }

    fn parse_symbol_table(&mut self) -> Result<()> {
        let Some(&index) = self
            .section_index
            .get(".symtab")
            .or_else(|| self.section_index.get(".dynsym"))
        else {
            // Stripped binary; DWARF queries still work without symbols.
            return Ok(());
        };
        let symtab = self.section_headers[index];
        let entsize = symtab.sh_entsize as usize;
        if entsize != mem::size_of::<Elf64_Sym>() {
            bail!("invalid symbol entry size");
        }
        if symtab.sh_size as usize % entsize != 0 {
            bail!("symbol table size is not a multiple of the entry size");
        }
        let count = symtab.sh_size as usize / entsize;
        let base = symtab.sh_offset as usize;

        // The linked string table holds the symbol names.
        let strtab = self
            .section_headers
            .get(symtab.sh_link as usize)
            .context("symbol table has no linked string table")?;
        let str_offset = strtab.sh_offset as usize;
        let str_size = strtab.sh_size as usize;
        if str_offset + str_size > self.mmap.len() {
            bail!("symbol string table extends past end of file");
        }

        for i in 0..count {
            let symbol: Elf64_Sym = read_struct(&self.mmap, base + i * entsize)?;
            self.symbols.push(symbol);
        }

        let names = self.mmap[str_offset..str_offset + str_size].to_vec();
        for (index, symbol) in self.symbols.iter().enumerate() {
            let Some(mangled) = cstr_at(&names, symbol.st_name as usize) else {
                continue;
            };
            if mangled.is_empty() {
                continue;
            }
            let demangled = demangle(mangled).to_string();
            self.symbol_index.entry(mangled.to_string()).or_insert(index);
            if demangled != mangled {
                self.symbol_index.entry(demangled).or_insert(index);
            }
            if elf64_st_type(symbol.st_info) == STT_FUNC && symbol.st_value != 0 {
                self.function_ranges.push((
                    symbol.st_value,
                    symbol.st_value + symbol.st_size,
                    index,
                ));
            }
        }
        self.function_ranges.sort_unstable_by_key(|&(start, _, _)| start);
        Ok(())
    }

    pub fn entry_point(&self) -> u64 {
        self.header.e_entry
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.section_index.keys().map(String::as_str)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section_index.contains_key(name)
    }

    /// The payload bytes of the first section with the given name. Absent
    /// sections are an error the caller decides how to surface.
    pub fn section_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let &index = self
            .section_index
            .get(name)
            .with_context(|| format!("section {name} absent from {}", self.path.display()))?;
        let section = &self.section_headers[index];
        let offset = section.sh_offset as usize;
        let size = section.sh_size as usize;
        if offset + size > self.mmap.len() {
            bail!("section {name} extends past end of file");
        }
        Ok(self.mmap[offset..offset + size].to_vec())
    }

    /// Entry address of the named function symbol (raw or demangled
    /// spelling), used as a fallback when DWARF has no matching subprogram.
    pub fn function_symbol_address(&self, name: &str) -> Option<u64> {
        let &index = self.symbol_index.get(name)?;
        let symbol = &self.symbols[index];
        if elf64_st_type(symbol.st_info) != STT_FUNC || symbol.st_value == 0 {
            return None;
        }
        Some(symbol.st_value)
    }

    /// Demangled name of the function symbol whose `[start, end)` interval
    /// covers `pc`.
    pub fn function_symbol_containing(&self, pc: u64) -> Option<String> {
        let partition = self
            .function_ranges
            .partition_point(|&(start, _, _)| start <= pc);
        // Zero-sized symbols still match at their exact start address.
        self.function_ranges[..partition]
            .iter()
            .rev()
            .find(|&&(start, end, _)| pc < end || pc == start)
            .map(|&(_, _, index)| {
                let symbol = &self.symbols[index];
                let name = self
                    .symbol_name(symbol.st_name as usize)
                    .unwrap_or_default();
                demangle(&name).to_string()
            })
    }

    fn symbol_name(&self, st_name: usize) -> Option<String> {
        let Some(&index) = self
            .section_index
            .get(".symtab")
            .or_else(|| self.section_index.get(".dynsym"))
        else {
            return None;
        };
        let strtab = self.section_headers.get(self.section_headers[index].sh_link as usize)?;
        let offset = strtab.sh_offset as usize;
        let size = strtab.sh_size as usize;
        if offset + size > self.mmap.len() {
            return None;
        }
        cstr_at(&self.mmap[offset..offset + size], st_name).map(str::to_string)
    }
}

fn cstr_at(data: &[u8], offset: usize) -> Option<&str> {
    if offset >= data.len() {
        return None;
    }
    let rest = &data[offset..];
    let end = rest.iter().position(|&byte| byte == 0)?;
    std::str::from_utf8(&rest[..end]).ok()
}
