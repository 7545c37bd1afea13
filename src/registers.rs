use nix::libc::user_regs_struct;

/// One row of the register table: printable name, DWARF register number
/// per the x86-64 psABI (-1 where the ABI assigns none), and accessors for
/// the matching `user_regs_struct` slot.
#[derive(Debug, PartialEq)]
pub struct RegisterInfo {
    pub name: &'static str,
    pub dwarf_id: i32,
    read: fn(&user_regs_struct) -> u64,
    write: fn(&mut user_regs_struct, u64),
}

impl RegisterInfo {
    pub fn read(&self, regs: &user_regs_struct) -> u64 {
        (self.read)(regs)
    }

    pub fn write(&self, regs: &mut user_regs_struct, value: u64) {
        (self.write)(regs, value)
    }
}

macro_rules! register {
    ($field:ident, $dwarf:expr) => {
        RegisterInfo {
            name: stringify!($field),
            dwarf_id: $dwarf,
            read: |regs| regs.$field,
            write: |regs, value| regs.$field = value,
        }
    };
}

/// The general-purpose register block, in `user_regs_struct` order.
pub static REGISTERS: [RegisterInfo; 27] = [
    register!(r15, 15),
    register!(r14, 14),
    register!(r13, 13),
    register!(r12, 12),
    register!(rbp, 6),
    register!(rbx, 3),
    register!(r11, 11),
    register!(r10, 10),
    register!(r9, 9),
    register!(r8, 8),
    register!(rax, 0),
    register!(rcx, 2),
    register!(rdx, 1),
    register!(rsi, 4),
    register!(rdi, 5),
    register!(orig_rax, -1),
    register!(rip, -1),
    register!(cs, 51),
    register!(eflags, 49),
    register!(rsp, 7),
    register!(ss, 52),
    register!(fs_base, 58),
    register!(gs_base, 59),
    register!(ds, 53),
    register!(es, 50),
    register!(fs, 54),
    register!(gs, 55),
];

pub fn register_by_name(name: &str) -> Option<&'static RegisterInfo> {
    REGISTERS.iter().find(|info| info.name == name)
}

pub fn register_by_dwarf_id(dwarf_id: i32) -> Option<&'static RegisterInfo> {
    if dwarf_id < 0 {
        return None;
    }
    REGISTERS.iter().find(|info| info.dwarf_id == dwarf_id)
}
