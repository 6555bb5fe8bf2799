//! Binary class emission for the Nova VM.
//!
//! Each MIR class serializes to one self-consistent container blob,
//! loadable independently: cross-unit references are by name only, never
//! by in-process identity. The artifact map is keyed by fully qualified
//! class name, in deterministic (declaration) order.

pub mod builder;
pub mod type_mapping;

use crate::errors::CompileError;
use crate::mir::{MirClass, MirModule};
use builder::{encode_method, write_u16, write_u32, ConstantPool, FORMAT_VERSION, MAGIC};
use indexmap::IndexMap;
use tracing::debug;

pub use type_mapping::TypeMapping;

pub struct CodeGenerator;

impl CodeGenerator {
    pub fn new() -> Self {
        CodeGenerator
    }

    /// Emit every class of the module as an independent container blob.
    pub fn emit_module(
        &self,
        module: &MirModule,
    ) -> Result<IndexMap<String, Vec<u8>>, CompileError> {
        let mut artifacts = IndexMap::new();
        for class in &module.classes {
            let blob = self.emit_class(class)?;
            debug!(class = %class.name, bytes = blob.len(), "emitted");
            artifacts.insert(class.name.clone(), blob);
        }
        Ok(artifacts)
    }

    fn emit_class(&self, class: &MirClass) -> Result<Vec<u8>, CompileError> {
        let mut pool = ConstantPool::new();

        let this_index = pool.utf8(&class.name.replace('.', "/"))?;
        let super_index = match &class.superclass {
            Some(superclass) => pool.utf8(superclass)?,
            None => 0,
        };

        // Intern field metadata
        let mut field_records = Vec::with_capacity(class.fields.len());
        for field in &class.fields {
            field_records.push((
                pool.utf8(&field.name)?,
                pool.utf8(&field.descriptor)?,
                field.flags,
            ));
        }

        // Encode method bodies (interning as we go)
        let mut method_records = Vec::with_capacity(class.methods.len());
        for method in &class.methods {
            let name_index = pool.utf8(&method.name)?;
            let descriptor_index = pool.utf8(&method.descriptor)?;
            let (code, handlers) = encode_method(method, &mut pool)?;
            method_records.push((
                name_index,
                descriptor_index,
                method.flags,
                method.max_locals,
                code,
                handlers,
            ));
        }

        let mut out = Vec::new();
        write_u32(&mut out, MAGIC);
        write_u16(&mut out, FORMAT_VERSION);
        pool.write(&mut out)?;
        write_u16(&mut out, this_index);
        write_u16(&mut out, super_index);
        write_u16(&mut out, class.flags);

        let field_count = u16::try_from(field_records.len()).map_err(|_| {
            CompileError::internal(
                "codegen",
                crate::span::Span::synthetic(),
                "too many fields",
            )
        })?;
        write_u16(&mut out, field_count);
        for (name, descriptor, flags) in field_records {
            write_u16(&mut out, name);
            write_u16(&mut out, descriptor);
            write_u16(&mut out, flags);
        }

        let method_count = u16::try_from(method_records.len()).map_err(|_| {
            CompileError::internal(
                "codegen",
                crate::span::Span::synthetic(),
                "too many methods",
            )
        })?;
        write_u16(&mut out, method_count);
        for (name, descriptor, flags, max_locals, code, handlers) in method_records {
            write_u16(&mut out, name);
            write_u16(&mut out, descriptor);
            write_u16(&mut out, flags);
            write_u16(&mut out, max_locals);
            let code_length = u32::try_from(code.len()).map_err(|_| {
                CompileError::internal(
                    "codegen",
                    crate::span::Span::synthetic(),
                    "method body too large",
                )
            })?;
            write_u32(&mut out, code_length);
            out.extend_from_slice(&code);
            let handler_count = u16::try_from(handlers.len()).map_err(|_| {
                CompileError::internal(
                    "codegen",
                    crate::span::Span::synthetic(),
                    "too many handlers",
                )
            })?;
            write_u16(&mut out, handler_count);
            for (start, end, target, class_index) in handlers {
                write_u16(&mut out, start);
                write_u16(&mut out, end);
                write_u16(&mut out, target);
                write_u16(&mut out, class_index);
            }
        }

        Ok(out)
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{MirField, MirInst, MirMethod, FIELD_FLAG_STATIC, METHOD_FLAG_STATIC};

    fn sample_class() -> MirClass {
        MirClass {
            name: "demo.Module".to_string(),
            superclass: None,
            flags: 0,
            fields: vec![MirField {
                name: "greeting".to_string(),
                descriptor: "Lnova/lang/String;".to_string(),
                flags: FIELD_FLAG_STATIC,
            }],
            methods: vec![MirMethod {
                name: "main".to_string(),
                descriptor: "()V".to_string(),
                flags: METHOD_FLAG_STATIC,
                max_locals: 0,
                code: vec![MirInst::Return],
                handlers: Vec::new(),
            }],
        }
    }

    #[test]
    fn test_magic_and_version() {
        let generator = CodeGenerator::new();
        let blob = generator.emit_class(&sample_class()).unwrap();

        assert_eq!(&blob[0..4], &MAGIC.to_be_bytes());
        assert_eq!(
            u16::from_be_bytes([blob[4], blob[5]]),
            FORMAT_VERSION
        );
    }

    #[test]
    fn test_artifacts_keyed_by_fully_qualified_name() {
        let generator = CodeGenerator::new();
        let module = MirModule {
            name: "demo".to_string(),
            classes: vec![sample_class()],
        };
        let artifacts = generator.emit_module(&module).unwrap();

        assert_eq!(artifacts.len(), 1);
        assert!(artifacts.contains_key("demo.Module"));
    }

    #[test]
    fn test_emission_is_deterministic() {
        let generator = CodeGenerator::new();
        let blob_a = generator.emit_class(&sample_class()).unwrap();
        let blob_b = generator.emit_class(&sample_class()).unwrap();
        assert_eq!(blob_a, blob_b);
    }
}
