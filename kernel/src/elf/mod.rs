//! ELF64 loader for AArch64 `ET_EXEC`/`ET_DYN` binaries.
//!
//! The kernel runs with the MMU off, so "loading" a segment is a direct
//! memory copy to `p_vaddr` -- no page tables, no address-space switch.
//! Position-independent binaries (`ET_DYN`) still need their `R_AARCH64_*`
//! self-relocations applied; this loader only implements
//! [`types::R_AARCH64_RELATIVE`], the sole relocation type `rustc`/`lld`
//! emit for a statically-linked, no-PLT PIE.

pub mod types;

use alloc::{boxed::Box, vec::Vec};

use types::{
    Elf64Dynamic, Elf64Header, Elf64ProgramHeader, Elf64Rela, ElfClass, ElfData, ElfType,
    DT_NULL, DT_RELA, DT_RELAENT, DT_RELASZ, ELF_MAGIC, EM_AARCH64, PT_DYNAMIC, PT_LOAD,
    R_AARCH64_RELATIVE,
};

use crate::error::KernelError;

fn bad_binary(reason: &'static str) -> KernelError {
    KernelError::InvalidArgument {
        name: "elf_image",
        value: reason,
    }
}

/// Read a `T` out of `image` at byte offset `offset`, bounds-checked.
///
/// # Safety
/// `T` must be `#[repr(C)]` and valid for any bit pattern (true of every
/// struct in [`types`]).
unsafe fn read_at<T: Copy>(image: &[u8], offset: usize) -> Result<T, KernelError> {
    let end = offset
        .checked_add(core::mem::size_of::<T>())
        .ok_or_else(|| bad_binary("offset overflow"))?;
    if end > image.len() {
        return Err(bad_binary("truncated"));
    }
    Ok(core::ptr::read_unaligned(image[offset..].as_ptr() as *const T))
}

fn parse_header(image: &[u8]) -> Result<Elf64Header, KernelError> {
    let header: Elf64Header = unsafe { read_at(image, 0)? };
    if header.magic != ELF_MAGIC {
        return Err(bad_binary("bad magic"));
    }
    if header.class != ElfClass::Elf64 as u8 {
        return Err(bad_binary("not ELFCLASS64"));
    }
    if header.data != ElfData::LittleEndian as u8 {
        return Err(bad_binary("not little-endian"));
    }
    if header.machine != EM_AARCH64 {
        return Err(bad_binary("not EM_AARCH64"));
    }
    if header.elf_type != ElfType::Executable as u16 && header.elf_type != ElfType::SharedObject as u16 {
        return Err(bad_binary("not ET_EXEC or ET_DYN"));
    }
    Ok(header)
}

fn program_headers(image: &[u8], header: &Elf64Header) -> Result<Vec<Elf64ProgramHeader>, KernelError> {
    if header.phentsize as usize != core::mem::size_of::<Elf64ProgramHeader>() {
        return Err(bad_binary("unexpected phentsize"));
    }
    let mut headers = Vec::with_capacity(header.phnum as usize);
    for i in 0..header.phnum as usize {
        let offset = header.phoff as usize + i * header.phentsize as usize;
        headers.push(unsafe { read_at(image, offset)? });
    }
    Ok(headers)
}

/// A loaded binary, ready to jump to `entry`.
#[derive(Debug)]
pub struct LoadedImage {
    /// Absolute entry point (`load_bias + e_entry`).
    pub entry: u64,
    /// Offset added to every `p_vaddr`/relocation to get the real address
    /// this image was placed at. Zero for `ET_EXEC`.
    pub load_bias: u64,
    pub is_pie: bool,
}

/// Load `image` (a complete ELF file already read into memory) with its
/// segments placed at `p_vaddr + load_bias`.
///
/// For `ET_EXEC` binaries `load_bias` must be `0`: their `p_vaddr`s are
/// already absolute. For `ET_DYN` the caller picks where the image goes.
pub fn load(image: &[u8], load_bias: u64) -> Result<LoadedImage, KernelError> {
    let header = parse_header(image)?;
    let is_pie = header.elf_type == ElfType::SharedObject as u16;
    if !is_pie && load_bias != 0 {
        return Err(bad_binary("load_bias must be 0 for ET_EXEC"));
    }

    let phdrs = program_headers(image, &header)?;

    for phdr in phdrs.iter().filter(|p| p.p_type == PT_LOAD) {
        load_segment(image, phdr, load_bias)?;
    }

    if let Some(dyn_phdr) = phdrs.iter().find(|p| p.p_type == PT_DYNAMIC) {
        apply_relative_relocations(image, dyn_phdr, load_bias)?;
    }

    Ok(LoadedImage {
        entry: header.entry + load_bias,
        load_bias,
        is_pie,
    })
}

/// Copy a `PT_LOAD` segment's file bytes to its target address and zero the
/// remainder up to `p_memsz` (the `.bss` tail).
fn load_segment(image: &[u8], phdr: &Elf64ProgramHeader, load_bias: u64) -> Result<(), KernelError> {
    let file_start = phdr.p_offset as usize;
    let file_end = file_start
        .checked_add(phdr.p_filesz as usize)
        .ok_or_else(|| bad_binary("segment file range overflow"))?;
    if file_end > image.len() {
        return Err(bad_binary("segment extends past end of file"));
    }

    let dest = (phdr.p_vaddr + load_bias) as *mut u8;
    // SAFETY: the MMU is off, so `p_vaddr + load_bias` is a real physical
    // address; the caller is responsible for having reserved it for this
    // image before calling `load`.
    unsafe {
        core::ptr::copy_nonoverlapping(image[file_start..file_end].as_ptr(), dest, phdr.p_filesz as usize);
        if phdr.p_memsz > phdr.p_filesz {
            let bss_start = dest.add(phdr.p_filesz as usize);
            core::ptr::write_bytes(bss_start, 0, (phdr.p_memsz - phdr.p_filesz) as usize);
        }
    }
    Ok(())
}

/// Walk the `PT_DYNAMIC` segment for `DT_RELA`/`DT_RELASZ`/`DT_RELAENT` and
/// apply every `R_AARCH64_RELATIVE` entry found there.
fn apply_relative_relocations(image: &[u8], dyn_phdr: &Elf64ProgramHeader, load_bias: u64) -> Result<(), KernelError> {
    let entry_size = core::mem::size_of::<Elf64Dynamic>();
    let count = phdr_to_entry_count(dyn_phdr, entry_size)?;

    let (mut rela_off, mut rela_size, mut rela_ent) = (None, 0usize, 0usize);
    for i in 0..count {
        let offset = dyn_phdr.p_offset as usize + i * entry_size;
        let entry: Elf64Dynamic = unsafe { read_at(image, offset)? };
        match entry.d_tag {
            DT_NULL => break,
            DT_RELA => rela_off = Some(entry.d_val as usize),
            DT_RELASZ => rela_size = entry.d_val as usize,
            DT_RELAENT => rela_ent = entry.d_val as usize,
            _ => {}
        }
    }

    let Some(rela_off) = rela_off else {
        return Ok(());
    };
    if rela_ent == 0 {
        rela_ent = core::mem::size_of::<Elf64Rela>();
    }
    let num_relocs = rela_size / rela_ent.max(1);

    for i in 0..num_relocs {
        let offset = rela_off + i * rela_ent;
        let rela: Elf64Rela = unsafe { read_at(image, offset)? };
        if rela.reloc_type() != R_AARCH64_RELATIVE {
            return Err(KernelError::OperationNotSupported {
                operation: "non-RELATIVE ELF relocation",
            });
        }
        let target = (rela.r_offset as i64 + load_bias as i64) as u64 as *mut u64;
        let value = (load_bias as i64 + rela.r_addend) as u64;
        // SAFETY: r_offset is a load-biased address inside a PT_LOAD segment
        // already copied into place by `load_segment`.
        unsafe {
            core::ptr::write_unaligned(target, value);
        }
    }
    Ok(())
}

fn phdr_to_entry_count(phdr: &Elf64ProgramHeader, entry_size: usize) -> Result<usize, KernelError> {
    if entry_size == 0 || phdr.p_filesz as usize % entry_size != 0 {
        return Err(bad_binary("PT_DYNAMIC size not a multiple of entry size"));
    }
    Ok(phdr.p_filesz as usize / entry_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_exec(entry: u64, load_vaddr: u64, payload: &[u8]) -> Vec<u8> {
        let ehsize = core::mem::size_of::<Elf64Header>();
        let phsize = core::mem::size_of::<Elf64ProgramHeader>();
        let phoff = ehsize as u64;
        let data_off = ehsize + phsize;

        let header = Elf64Header {
            magic: ELF_MAGIC,
            class: ElfClass::Elf64 as u8,
            data: ElfData::LittleEndian as u8,
            version: 1,
            os_abi: 0,
            abi_version: 0,
            padding: [0; 7],
            elf_type: ElfType::Executable as u16,
            machine: EM_AARCH64,
            version2: 1,
            entry,
            phoff,
            shoff: 0,
            flags: 0,
            ehsize: ehsize as u16,
            phentsize: phsize as u16,
            phnum: 1,
            shentsize: 0,
            shnum: 0,
            shstrndx: 0,
        };
        let phdr = Elf64ProgramHeader {
            p_type: PT_LOAD,
            p_flags: 0,
            p_offset: data_off as u64,
            p_vaddr: load_vaddr,
            p_paddr: load_vaddr,
            p_filesz: payload.len() as u64,
            p_memsz: payload.len() as u64,
            p_align: 8,
        };

        let mut image = Vec::new();
        image.extend_from_slice(unsafe {
            core::slice::from_raw_parts(&header as *const _ as *const u8, ehsize)
        });
        image.extend_from_slice(unsafe {
            core::slice::from_raw_parts(&phdr as *const _ as *const u8, phsize)
        });
        image.extend_from_slice(payload);
        image
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = minimal_exec(0x1000, 0x1000, &[1, 2, 3, 4]);
        image[0] = 0;
        assert!(parse_header(&image).is_err());
    }

    #[test]
    fn load_places_exec_segment_and_reports_entry() {
        let payload = alloc::vec![0xaau8; 16];
        let buf = Box::new([0u8; 4096]);
        let addr = Box::leak(buf).as_ptr() as u64;
        let image = minimal_exec(addr + 8, addr, &payload);

        let loaded = load(&image, 0).unwrap();
        assert_eq!(loaded.entry, addr + 8);
        assert!(!loaded.is_pie);
        let placed = unsafe { core::slice::from_raw_parts(addr as *const u8, payload.len()) };
        assert_eq!(placed, payload.as_slice());
    }

    #[test]
    fn rejects_load_bias_for_et_exec() {
        let image = minimal_exec(0x1000, 0x1000, &[0u8; 4]);
        assert!(load(&image, 0x2000).is_err());
    }
}
