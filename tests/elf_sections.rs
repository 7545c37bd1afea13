use std::fs;
use std::mem;
use std::path::PathBuf;

use nix::libc::{Elf64_Ehdr, Elf64_Shdr, Elf64_Sym};
use sldbg::elf::{Elf, ET_EXEC};

fn struct_bytes<T: Copy>(value: &T) -> Vec<u8> {
    let size = mem::size_of::<T>();
    let mut bytes = vec![0u8; size];
    unsafe {
        std::ptr::copy_nonoverlapping(value as *const T as *const u8, bytes.as_mut_ptr(), size);
    }
    bytes
}

/// Assemble a minimal 64-bit ELF executable on disk: one debug section, a
/// symbol table with one function, and the necessary string tables.
fn write_fixture() -> (PathBuf, Vec<u8>) {
    let debug_info: Vec<u8> = vec![0x01, 0x02, 0x03, 0x04];
    let symtab_offset = 68u64;
    let strtab_offset = symtab_offset + 2 * mem::size_of::<Elf64_Sym>() as u64; // 116
    let strtab: &[u8] = b"\0knapsack\0";
    let shstrtab_offset = strtab_offset + strtab.len() as u64; // 126
    let shstrtab: &[u8] = b"\0.debug_info\0.symtab\0.strtab\0.shstrtab\0";
    let shoff = shstrtab_offset + shstrtab.len() as u64 + 3; // 168, arbitrary padding

    let mut header: Elf64_Ehdr = unsafe { mem::zeroed() };
    header.e_ident[..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    header.e_ident[4] = 2; // ELFCLASS64
    header.e_ident[5] = 1; // little endian
    header.e_ident[6] = 1;
    header.e_type = ET_EXEC;
    header.e_machine = 0x3e; // EM_X86_64
    header.e_version = 1;
    header.e_entry = 0x400500;
    header.e_shoff = shoff;
    header.e_ehsize = mem::size_of::<Elf64_Ehdr>() as u16;
    header.e_shentsize = mem::size_of::<Elf64_Shdr>() as u16;
    header.e_shnum = 5;
    header.e_shstrndx = 4;

    let mut null_sym: Elf64_Sym = unsafe { mem::zeroed() };
    null_sym.st_name = 0;
    let mut func_sym: Elf64_Sym = unsafe { mem::zeroed() };
    func_sym.st_name = 1; // "knapsack"
    func_sym.st_info = 0x12; // GLOBAL | FUNC
    func_sym.st_value = 0x400500;
    func_sym.st_size = 0x100;

    let section = |name: u32, offset: u64, size: u64, entsize: u64, link: u32| {
        let mut shdr: Elf64_Shdr = unsafe { mem::zeroed() };
        shdr.sh_name = name;
        shdr.sh_offset = offset;
        shdr.sh_size = size;
        shdr.sh_entsize = entsize;
        shdr.sh_link = link;
        shdr
    };
    let sections = [
        unsafe { mem::zeroed() },
        section(1, 64, debug_info.len() as u64, 0, 0), // .debug_info
        section(
            13,
            symtab_offset,
            2 * mem::size_of::<Elf64_Sym>() as u64,
            mem::size_of::<Elf64_Sym>() as u64,
            3,
        ), // .symtab, linked to .strtab
        section(21, strtab_offset, strtab.len() as u64, 0, 0), // .strtab
        section(29, shstrtab_offset, shstrtab.len() as u64, 0, 0), // .shstrtab
    ];

    let mut image = struct_bytes(&header);
    image.extend(&debug_info);
    image.extend(struct_bytes(&null_sym));
    image.extend(struct_bytes(&func_sym));
    image.extend(strtab);
    image.extend(shstrtab);
    image.resize(shoff as usize, 0);
    for shdr in &sections {
        image.extend(struct_bytes(shdr));
    }

    let path = std::env::temp_dir().join(format!("sldbg-elf-fixture-{}", std::process::id()));
    fs::write(&path, &image).expect("fixture image should be writable");
    (path, debug_info)
}

#[test]
fn sections_and_symbols_resolve() {
    let (path, debug_info) = write_fixture();
    let elf = Elf::open(&path).expect("fixture should parse");

    assert_eq!(elf.header.e_type, ET_EXEC);
    assert_eq!(elf.entry_point(), 0x400500);

    assert!(elf.has_section(".debug_info"));
    assert_eq!(elf.section_bytes(".debug_info").unwrap(), debug_info);

    // Absent sections are an error naming the section.
    let err = elf.section_bytes(".debug_abbrev").unwrap_err();
    assert!(err.to_string().contains("absent"), "unexpected error: {err:#}");

    assert_eq!(elf.function_symbol_address("knapsack"), Some(0x400500));
    assert_eq!(elf.function_symbol_address("missing"), None);

    assert_eq!(
        elf.function_symbol_containing(0x400550).as_deref(),
        Some("knapsack")
    );
    assert_eq!(elf.function_symbol_containing(0x400700), None);
    assert_eq!(elf.function_symbol_containing(0x400000), None);

    let _ = fs::remove_file(path);
}

#[test]
fn non_elf_files_are_rejected() {
    let path = std::env::temp_dir().join(format!("sldbg-not-elf-{}", std::process::id()));
    fs::write(&path, b"definitely not an executable").unwrap();
    assert!(Elf::open(&path).is_err());
    let _ = fs::remove_file(path);
}
