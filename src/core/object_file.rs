// This module wraps the bytes of a generated function in a relocatable object file using the
// object crate's writer, so standard tools (objdump, llvm-objdump, gdb) can disassemble it. The
// object holds a single .text section and one global function symbol spanning the code. ELF
// is produced everywhere except macOS, which gets Mach-O.

//! Object-file export of generated code.

use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

use crate::core::error::JitResult;

#[cfg(target_arch = "x86_64")]
const ARCHITECTURE: Architecture = Architecture::X86_64;
#[cfg(target_arch = "aarch64")]
const ARCHITECTURE: Architecture = Architecture::Aarch64;

#[cfg(target_os = "macos")]
const FORMAT: BinaryFormat = BinaryFormat::MachO;
#[cfg(not(target_os = "macos"))]
const FORMAT: BinaryFormat = BinaryFormat::Elf;

/// Build an object file defining `name` as the function in `code`.
pub fn object_file(code: &[u8], name: &str) -> JitResult<Vec<u8>> {
    let mut obj = Object::new(FORMAT, ARCHITECTURE, Endianness::Little);
    let text = obj.section_id(StandardSection::Text);
    let offset = obj.append_section_data(text, code, 16);

    obj.add_symbol(Symbol {
        name: name.as_bytes().to_vec(),
        value: offset,
        size: code.len() as u64,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });

    Ok(obj.write()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{Object as _, ObjectSection, ObjectSymbol};

    #[test]
    fn test_object_contains_code_and_symbol() {
        let code = [0x90u8, 0x90, 0xC3, 0x00];
        let bytes = object_file(&code, "kernel").unwrap();

        let file = object::File::parse(&*bytes).unwrap();
        let text = file
            .sections()
            .find(|s| s.kind() == object::SectionKind::Text)
            .unwrap();
        assert_eq!(text.data().unwrap(), &code);

        let symbol = file
            .symbols()
            .find(|s| s.name().is_ok_and(|n| n.ends_with("kernel")))
            .unwrap();
        assert_eq!(symbol.kind(), SymbolKind::Text);
        if FORMAT == BinaryFormat::Elf {
            assert_eq!(symbol.size(), code.len() as u64);
        }
    }
}
