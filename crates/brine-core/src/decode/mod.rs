//! Module decoder: bytes to [`Module`].
//!
//! Walks the section list, enforcing order, exact section sizes and the
//! cross-section count checks. Everything that can be decided from the bytes
//! alone is rejected here as a [`DecodeError`]; type checking is left to the
//! validator.

mod code;

pub use code::MAX_LOCALS;

use tracing::debug;

use crate::binary::{section, Reader, Result, MAGIC, VERSION};
use crate::error::DecodeError;
use crate::instr::{ConstExpr, Instr};
use crate::module::{
    DataMode, DataSegment, ElemMode, ElemSegment, Export, Global, Import, ImportDesc, Module,
    Names,
};
use crate::types::{ExternKind, FuncType, GlobalType, MemoryType, RefType, TableType};
use code::{read_func_body, ExprDecoder};

/// Decode a binary module. No partial module is ever returned.
pub fn decode(bytes: &[u8]) -> Result<Module> {
    let mut r = Reader::new(bytes);
    if r.read_bytes(4)? != MAGIC {
        return Err(DecodeError::new("magic header not detected", 0));
    }
    if r.read_bytes(4)? != VERSION {
        return Err(DecodeError::new("unknown binary version", 4));
    }

    let mut decoder = SectionDecoder::default();
    while !r.is_empty() {
        let id_offset = r.offset();
        let id = r.read_u8()?;
        let size = r.read_var_u32()?;
        let mut payload = r.sub_reader(size as usize)?;
        debug!(id, size, offset = id_offset, "decoding section");
        decoder.section(id, id_offset, &mut payload)?;
        if !payload.is_empty() {
            return Err(payload.error("section size mismatch"));
        }
    }
    decoder.finish(r.offset())
}

#[derive(Default)]
struct SectionDecoder {
    module: Module,
    last_rank: u8,
    saw_code: bool,
}

impl SectionDecoder {
    fn section(&mut self, id: u8, offset: usize, r: &mut Reader<'_>) -> Result<()> {
        if id == section::CUSTOM {
            return self.custom(r);
        }
        let Some(rank) = section::rank(id) else {
            debug!(id, "skipping unknown section");
            r.read_bytes(r.remaining())?;
            return Ok(());
        };
        if rank <= self.last_rank {
            return Err(DecodeError::new(
                "unexpected content after last section",
                offset,
            ));
        }
        self.last_rank = rank;

        let m = &mut self.module;
        match id {
            section::TYPE => m.types = r.read_vec(read_func_type)?,
            section::IMPORT => m.imports = r.read_vec(read_import)?,
            section::FUNCTION => m.funcs = r.read_vec(|r| r.read_var_u32())?,
            section::TABLE => m.tables = r.read_vec(read_table_type)?,
            section::MEMORY => {
                m.memories = r.read_vec(|r| Ok(MemoryType { limits: r.read_limits()? }))?
            }
            section::GLOBAL => {
                let exprs = ExprDecoder::new(m.data_count.is_some());
                m.globals = r.read_vec(|r| {
                    let ty = read_global_type(r)?;
                    let init = ConstExpr(exprs.read_expr(r)?);
                    Ok(Global { ty, init })
                })?
            }
            section::EXPORT => m.exports = r.read_vec(read_export)?,
            section::START => m.start = Some(r.read_var_u32()?),
            section::ELEMENT => {
                let exprs = ExprDecoder::new(m.data_count.is_some());
                m.elems = r.read_vec(|r| read_elem(r, &exprs))?
            }
            section::DATA_COUNT => m.data_count = Some(r.read_var_u32()?),
            section::CODE => {
                self.saw_code = true;
                let count_offset = r.offset();
                let count = r.read_count()?;
                if count as usize != m.funcs.len() {
                    return Err(DecodeError::new(
                        "function and code section have inconsistent lengths",
                        count_offset,
                    ));
                }
                let has_data_count = m.data_count.is_some();
                let mut code = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let size = r.read_var_u32()?;
                    let mut body = r.sub_reader(size as usize)?;
                    code.push(read_func_body(&mut body, has_data_count)?);
                }
                m.code = code;
            }
            section::DATA => {
                let count_offset = r.offset();
                let exprs = ExprDecoder::new(m.data_count.is_some());
                m.datas = r.read_vec(|r| read_data(r, &exprs))?;
                if let Some(expected) = m.data_count {
                    if expected as usize != m.datas.len() {
                        return Err(DecodeError::new(
                            "data count and data section have inconsistent lengths",
                            count_offset,
                        ));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn custom(&mut self, r: &mut Reader<'_>) -> Result<()> {
        let name = r.read_name()?;
        debug!(name = %name, "custom section");
        if name == "name" {
            // Debug names are best-effort: a broken name section is ignored.
            if let Ok(names) = read_names(&mut r.clone()) {
                self.module.names = names;
            }
        }
        r.read_bytes(r.remaining())?;
        Ok(())
    }

    fn finish(self, end: usize) -> Result<Module> {
        let m = self.module;
        if !self.saw_code && !m.funcs.is_empty() {
            return Err(DecodeError::new(
                "function and code section have inconsistent lengths",
                end,
            ));
        }
        if let Some(expected) = m.data_count {
            if expected as usize != m.datas.len() {
                return Err(DecodeError::new(
                    "data count and data section have inconsistent lengths",
                    end,
                ));
            }
        }
        Ok(m)
    }
}

fn read_func_type(r: &mut Reader<'_>) -> Result<FuncType> {
    let offset = r.offset();
    if r.read_u8()? != 0x60 {
        return Err(DecodeError::new("malformed function type", offset));
    }
    let params = r.read_vec(|r| r.read_val_type())?;
    let results = r.read_vec(|r| r.read_val_type())?;
    Ok(FuncType { params, results })
}

fn read_table_type(r: &mut Reader<'_>) -> Result<TableType> {
    let elem = r.read_ref_type()?;
    let limits = r.read_limits()?;
    Ok(TableType { elem, limits })
}

fn read_global_type(r: &mut Reader<'_>) -> Result<GlobalType> {
    let content = r.read_val_type()?;
    let offset = r.offset();
    let mutable = match r.read_u8()? {
        0 => false,
        1 => true,
        _ => return Err(DecodeError::new("malformed mutability", offset)),
    };
    Ok(GlobalType { content, mutable })
}

fn read_import(r: &mut Reader<'_>) -> Result<Import> {
    let module = r.read_name()?;
    let name = r.read_name()?;
    let offset = r.offset();
    let desc = match r.read_u8()? {
        0x00 => ImportDesc::Func(r.read_var_u32()?),
        0x01 => ImportDesc::Table(read_table_type(r)?),
        0x02 => ImportDesc::Memory(MemoryType {
            limits: r.read_limits()?,
        }),
        0x03 => ImportDesc::Global(read_global_type(r)?),
        _ => return Err(DecodeError::new("malformed import kind", offset)),
    };
    Ok(Import { module, name, desc })
}

fn read_export(r: &mut Reader<'_>) -> Result<Export> {
    let name = r.read_name()?;
    let offset = r.offset();
    let kind = match r.read_u8()? {
        0x00 => ExternKind::Func,
        0x01 => ExternKind::Table,
        0x02 => ExternKind::Memory,
        0x03 => ExternKind::Global,
        _ => return Err(DecodeError::new("malformed export kind", offset)),
    };
    let index = r.read_var_u32()?;
    Ok(Export { name, kind, index })
}

/// Element segment, all eight encodings. Bit 0: passive or declarative;
/// bit 1: explicit table index (active) or declarative; bit 2: items are
/// expressions rather than function indices.
fn read_elem(r: &mut Reader<'_>, exprs: &ExprDecoder) -> Result<ElemSegment> {
    let offset = r.offset();
    let flags = r.read_var_u32()?;
    if flags > 7 {
        return Err(DecodeError::new("malformed elements segment kind", offset));
    }
    let active = flags & 0b001 == 0;
    let explicit = flags & 0b010 != 0;
    let uses_exprs = flags & 0b100 != 0;

    let mode = if active {
        let table = if explicit { r.read_var_u32()? } else { 0 };
        let offset = ConstExpr(exprs.read_expr(r)?);
        ElemMode::Active { table, offset }
    } else if explicit {
        ElemMode::Declarative
    } else {
        ElemMode::Passive
    };

    // Flags 0 and 4 imply funcref with no type byte.
    let ty = if active && !explicit {
        RefType::Func
    } else if uses_exprs {
        r.read_ref_type()?
    } else {
        let kind_offset = r.offset();
        if r.read_u8()? != 0x00 {
            return Err(DecodeError::new("malformed element kind", kind_offset));
        }
        RefType::Func
    };

    let items = if uses_exprs {
        r.read_vec(|r| Ok(ConstExpr(exprs.read_expr(r)?)))?
    } else {
        r.read_vec(|r| Ok(ConstExpr(vec![Instr::RefFunc(r.read_var_u32()?), Instr::End])))?
    };
    Ok(ElemSegment { ty, mode, items })
}

fn read_data(r: &mut Reader<'_>, exprs: &ExprDecoder) -> Result<DataSegment> {
    let offset = r.offset();
    let mode = match r.read_var_u32()? {
        0 => DataMode::Active {
            memory: 0,
            offset: ConstExpr(exprs.read_expr(r)?),
        },
        1 => DataMode::Passive,
        2 => {
            let memory = r.read_var_u32()?;
            DataMode::Active {
                memory,
                offset: ConstExpr(exprs.read_expr(r)?),
            }
        }
        _ => return Err(DecodeError::new("malformed data segment kind", offset)),
    };
    let len = r.read_var_u32()? as usize;
    let bytes = r.read_bytes(len)?.to_vec();
    Ok(DataSegment { mode, bytes })
}

/// `name` custom section: module name (subsection 0) and function names
/// (subsection 1). Other subsections are skipped.
fn read_names(r: &mut Reader<'_>) -> Result<Names> {
    let mut names = Names::default();
    while !r.is_empty() {
        let id = r.read_u8()?;
        let size = r.read_var_u32()?;
        let mut sub = r.sub_reader(size as usize)?;
        match id {
            0 => names.module = Some(sub.read_name()?),
            1 => {
                for _ in 0..sub.read_count()? {
                    let index = sub.read_var_u32()?;
                    let name = sub.read_name()?;
                    names.funcs.insert(index, name);
                }
            }
            _ => {}
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValType;

    const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    fn module_bytes(sections: &[&[u8]]) -> Vec<u8> {
        let mut bytes = HEADER.to_vec();
        for s in sections {
            bytes.extend_from_slice(s);
        }
        bytes
    }

    fn message(bytes: &[u8]) -> String {
        decode(bytes).unwrap_err().message
    }

    #[test]
    fn empty_module() {
        let module = decode(&HEADER).unwrap();
        assert_eq!(module, Module::default());
    }

    #[test]
    fn header_errors() {
        assert_eq!(message(&[]), "unexpected end");
        assert_eq!(message(b"\0asn\x01\0\0\0"), "magic header not detected");
        assert_eq!(message(b"\0asm\x02\0\0\0"), "unknown binary version");
    }

    #[test]
    fn decodes_wat_fixture() {
        let wasm = wat::parse_str(
            r#"(module
                (type (func (param i32) (result i32)))
                (import "env" "g" (global i32))
                (table 2 funcref)
                (memory 1 2)
                (func (type 0) local.get 0)
                (export "id" (func 0))
                (elem (i32.const 0) 0)
                (data (i32.const 8) "hi"))"#,
        )
        .unwrap();
        let module = decode(&wasm).unwrap();
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.num_imported_globals(), 1);
        assert_eq!(module.funcs, vec![0]);
        assert_eq!(module.code[0].instrs, vec![Instr::LocalGet(0), Instr::End]);
        assert_eq!(module.export("id").map(|e| e.index), Some(0));
        assert_eq!(module.elems[0].items.len(), 1);
        assert_eq!(module.datas[0].bytes, b"hi");
    }

    #[test]
    fn decode_is_idempotent() {
        let wasm = wat::parse_str(
            r#"(module (func (export "f") (result f64) f64.const nan:0x1 ))"#,
        )
        .unwrap();
        assert_eq!(decode(&wasm).unwrap(), decode(&wasm).unwrap());
    }

    #[test]
    fn section_size_must_match_payload() {
        // type section declaring 1 type but 5 payload bytes with a trailing byte
        let bytes = module_bytes(&[&[0x01, 0x05, 0x01, 0x60, 0x00, 0x00, 0x00]]);
        assert_eq!(message(&bytes), "section size mismatch");
    }

    #[test]
    fn sections_must_be_ordered() {
        // memory section then type section
        let bytes = module_bytes(&[&[0x05, 0x03, 0x01, 0x00, 0x01], &[0x01, 0x01, 0x00]]);
        assert_eq!(message(&bytes), "unexpected content after last section");
    }

    #[test]
    fn duplicate_sections_are_rejected() {
        let bytes = module_bytes(&[&[0x01, 0x01, 0x00], &[0x01, 0x01, 0x00]]);
        assert_eq!(message(&bytes), "unexpected content after last section");
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let bytes = module_bytes(&[&[0x20, 0x02, 0xaa, 0xbb]]);
        assert!(decode(&bytes).is_ok());
    }

    #[test]
    fn custom_sections_anywhere() {
        let custom: &[u8] = &[0x00, 0x04, 0x03, b'a', b'b', b'c'];
        let bytes = module_bytes(&[custom, &[0x01, 0x01, 0x00], custom]);
        assert!(decode(&bytes).is_ok());
    }

    #[test]
    fn function_without_code_is_malformed() {
        let bytes = module_bytes(&[&[0x01, 0x04, 0x01, 0x60, 0x00, 0x00], &[0x03, 0x02, 0x01, 0x00]]);
        assert_eq!(
            message(&bytes),
            "function and code section have inconsistent lengths"
        );
    }

    #[test]
    fn data_count_mismatch_is_malformed() {
        let bytes = module_bytes(&[&[0x0c, 0x01, 0x01]]);
        assert_eq!(
            message(&bytes),
            "data count and data section have inconsistent lengths"
        );
    }

    #[test]
    fn all_element_encodings() {
        let wasm = wat::parse_str(
            r#"(module
                (table $t 4 funcref)
                (table $e 4 externref)
                (func $f)
                (elem (i32.const 0) $f)
                (elem func $f)
                (elem (table $t) (i32.const 1) func $f)
                (elem declare func $f)
                (elem (i32.const 2) funcref (ref.func $f))
                (elem funcref (ref.null func))
                (elem (table $e) (i32.const 0) externref (ref.null extern))
                (elem declare funcref (ref.func $f)))"#,
        )
        .unwrap();
        let module = decode(&wasm).unwrap();
        assert_eq!(module.elems.len(), 8);
        assert!(matches!(module.elems[1].mode, ElemMode::Passive));
        assert!(matches!(module.elems[3].mode, ElemMode::Declarative));
        assert!(matches!(
            module.elems[6].mode,
            ElemMode::Active { table: 1, .. }
        ));
        assert_eq!(module.elems[6].ty, RefType::Extern);
    }

    #[test]
    fn name_section_is_read() {
        let wasm = wat::parse_str(r#"(module $m (func $answer))"#).unwrap();
        let module = decode(&wasm).unwrap();
        assert_eq!(module.names.module.as_deref(), Some("m"));
        assert_eq!(module.names.funcs.get(&0).map(String::as_str), Some("answer"));
    }

    #[test]
    fn bad_value_type_is_malformed() {
        // (type (func (param <0x7b>)))
        let bytes = module_bytes(&[&[0x01, 0x05, 0x01, 0x60, 0x01, 0x7b, 0x00]]);
        assert_eq!(message(&bytes), "malformed value type 0x7b");
    }

    #[test]
    fn globals_decode_type_and_init() {
        let wasm = wat::parse_str(r#"(module (global (mut i64) (i64.const -5)))"#).unwrap();
        let module = decode(&wasm).unwrap();
        assert_eq!(module.globals[0].ty.content, ValType::I64);
        assert!(module.globals[0].ty.mutable);
        assert_eq!(module.globals[0].init.single(), Some(&Instr::I64Const(-5)));
    }
}
