//! Function symbol table used to name frames in backtraces.
//!
//! Symbols come from the `.symtab` section of the user program's ELF64
//! image. Only `STT_FUNC` entries are kept, and at most `MAX_SYMBOLS` of them.

use core::fmt;
use crate::config::{MAX_SYMBOLS, SYMBOL_NAME_LEN};

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELF_CLASS_64: u8 = 2;
const ELF_DATA_LITTLE: u8 = 1;
const ELF_HEADER_SIZE: usize = 64;
const SECTION_HEADER_SIZE: usize = 64;
const SYMBOL_ENTRY_SIZE: usize = 24;
const SHT_SYMTAB: u32 = 2;
const STT_FUNC: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    Truncated,
    BadMagic,
    NotElf64,
    NoSymtab,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ElfError::Truncated => write!(f, "ELF image truncated"),
            ElfError::BadMagic => write!(f, "Invalid ELF magic"),
            ElfError::NotElf64 => write!(f, "Not a little-endian ELF64 image"),
            ElfError::NoSymtab => write!(f, "ELF image has no symbol table"),
        }
    }
}

/// A named address range `[start, start + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    name: [u8; SYMBOL_NAME_LEN],
    name_len: usize,
    pub start: u64,
    pub size: u64,
}

impl Symbol {
    const EMPTY: Symbol = Symbol {
        name: [0; SYMBOL_NAME_LEN],
        name_len: 0,
        start: 0,
        size: 0,
    };

    /// Names longer than `SYMBOL_NAME_LEN - 1` bytes are cut at a char boundary.
    pub fn new(name: &str, start: u64, size: u64) -> Self {
        let mut len = name.len().min(SYMBOL_NAME_LEN - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut sym = Symbol { start, size, ..Symbol::EMPTY };
        sym.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        sym.name_len = len;
        sym
    }

    pub fn name(&self) -> &str {
        // Built from a &str cut at a char boundary.
        core::str::from_utf8(&self.name[..self.name_len]).unwrap_or("")
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr - self.start < self.size
    }
}

pub struct SymbolTable {
    symbols: [Symbol; MAX_SYMBOLS],
    len: usize,
}

impl SymbolTable {
    pub const fn new() -> Self {
        Self {
            symbols: [Symbol::EMPTY; MAX_SYMBOLS],
            len: 0,
        }
    }

    /// Add a symbol. Returns `false` once the table is full.
    pub fn push(&mut self, symbol: Symbol) -> bool {
        match self.symbols.get_mut(self.len) {
            Some(slot) => {
                *slot = symbol;
                self.len += 1;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols[..self.len].iter()
    }

    /// The function whose body contains `addr`.
    pub fn lookup(&self, addr: u64) -> Option<&Symbol> {
        self.iter().find(|sym| sym.contains(addr))
    }

    /// Collect the function symbols of an ELF64 little-endian image.
    pub fn from_elf(image: &[u8]) -> Result<Self, ElfError> {
        if image.len() < ELF_HEADER_SIZE {
            return Err(ElfError::Truncated);
        }
        if image[0..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if image[4] != ELF_CLASS_64 || image[5] != ELF_DATA_LITTLE {
            return Err(ElfError::NotElf64);
        }

        let shoff = read_u64(image, 0x28)? as usize;
        let shentsize = read_u16(image, 0x3A)? as usize;
        let shnum = read_u16(image, 0x3C)? as usize;
        if shentsize < SECTION_HEADER_SIZE {
            return Err(ElfError::Truncated);
        }

        let section = |index: usize| -> Result<Section, ElfError> {
            let base = index
                .checked_mul(shentsize)
                .and_then(|off| off.checked_add(shoff))
                .ok_or(ElfError::Truncated)?;
            Section::parse(image, base)
        };

        let mut symtab = None;
        for index in 0..shnum {
            let sh = section(index)?;
            if sh.kind == SHT_SYMTAB {
                symtab = Some(sh);
                break;
            }
        }
        let symtab = symtab.ok_or(ElfError::NoSymtab)?;
        let strtab = section(symtab.link as usize)?;
        let strings = strtab.bytes(image)?;
        let entries = symtab.bytes(image)?;

        let mut table = SymbolTable::new();
        for entry in entries.chunks_exact(SYMBOL_ENTRY_SIZE) {
            let info = entry[4];
            if info & 0xf != STT_FUNC {
                continue;
            }
            let name_off = read_u32(entry, 0)? as usize;
            let value = read_u64(entry, 8)?;
            let size = read_u64(entry, 16)?;
            let name = c_str(strings, name_off)?;
            if !table.push(Symbol::new(name, value, size)) {
                break;
            }
        }
        Ok(table)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

struct Section {
    kind: u32,
    offset: u64,
    size: u64,
    link: u32,
}

impl Section {
    fn parse(image: &[u8], base: usize) -> Result<Self, ElfError> {
        let end = base.checked_add(SECTION_HEADER_SIZE).ok_or(ElfError::Truncated)?;
        let header = image.get(base..end).ok_or(ElfError::Truncated)?;
        Ok(Section {
            kind: read_u32(header, 4)?,
            offset: read_u64(header, 24)?,
            size: read_u64(header, 32)?,
            link: read_u32(header, 40)?,
        })
    }

    fn bytes<'a>(&self, image: &'a [u8]) -> Result<&'a [u8], ElfError> {
        let start = self.offset as usize;
        let end = start.checked_add(self.size as usize).ok_or(ElfError::Truncated)?;
        image.get(start..end).ok_or(ElfError::Truncated)
    }
}

fn field<const N: usize>(data: &[u8], off: usize) -> Result<[u8; N], ElfError> {
    let end = off.checked_add(N).ok_or(ElfError::Truncated)?;
    let mut out = [0u8; N];
    out.copy_from_slice(data.get(off..end).ok_or(ElfError::Truncated)?);
    Ok(out)
}

fn read_u16(data: &[u8], off: usize) -> Result<u16, ElfError> {
    field(data, off).map(u16::from_le_bytes)
}

fn read_u32(data: &[u8], off: usize) -> Result<u32, ElfError> {
    field(data, off).map(u32::from_le_bytes)
}

fn read_u64(data: &[u8], off: usize) -> Result<u64, ElfError> {
    field(data, off).map(u64::from_le_bytes)
}

/// NUL-terminated string at `off`. Non-UTF-8 names become empty.
fn c_str(strings: &[u8], off: usize) -> Result<&str, ElfError> {
    let tail = strings.get(off..).ok_or(ElfError::Truncated)?;
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    Ok(core::str::from_utf8(&tail[..end]).unwrap_or(""))
}
