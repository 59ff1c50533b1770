use anyhow::{Context, Result};
use jclassfile::class_file;

use crate::access::AccessTransformer;
use crate::remap::DeobfuscationRemapper;

/// The class-load transformation chain: access widening first, then symbol
/// remapping, always in that order and always over the same byte stream.
/// Every emitted class is re-validated before it leaves the pipeline; a
/// corrupt class file must never reach the loader.
pub struct Pipeline {
    access: Option<AccessTransformer>,
    remapper: Option<DeobfuscationRemapper>,
}

impl Pipeline {
    pub fn new(
        access: Option<AccessTransformer>,
        remapper: Option<DeobfuscationRemapper>,
    ) -> Pipeline {
        Pipeline { access, remapper }
    }

    /// Transform one class. `internal_name` is the slash-form name the
    /// bytes were located under; access rules are keyed by the dot-form
    /// deobfuscated name, which is derived here.
    pub fn transform(
        &mut self,
        internal_name: &str,
        bytes: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
        let dotted = internal_name.replace('/', ".");
        let transformed_name = match &self.remapper {
            Some(remapper) => remapper.remap_class_name(&dotted),
            None => dotted.clone(),
        };

        let bytes = match &self.access {
            Some(access) => access.transform(&dotted, &transformed_name, bytes)?,
            None => bytes,
        };
        let bytes = match &mut self.remapper {
            Some(remapper) => remapper.transform(&dotted, &transformed_name, bytes)?,
            None => bytes,
        };

        if let Some(output) = &bytes {
            class_file::parse(output)
                .with_context(|| format!("transformed class {transformed_name} failed validation"))?;
        }
        Ok(bytes)
    }

    /// Internal-form name the transformed class should be stored under.
    pub fn output_name(&self, internal_name: &str) -> String {
        match &self.remapper {
            Some(remapper) => remapper.map(internal_name).to_string(),
            None => internal_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::classfile::{ACC_PRIVATE, ACC_PUBLIC, ClassFile};
    use crate::mappings::parse_srg;
    use crate::opcodes::RETURN;
    use crate::testutil::ClassBuilder;

    fn widget_bytes() -> Vec<u8> {
        ClassBuilder::new("a", "java/lang/Object")
            .method(ACC_PRIVATE, "c", "(I)V", vec![RETURN])
            .build()
            .serialize()
    }

    fn remapper_for(bytes: &[u8]) -> DeobfuscationRemapper {
        let mut source = HashMap::new();
        source.insert("a".to_string(), bytes.to_vec());
        DeobfuscationRemapper::new(
            parse_srg(
                "CL: a net/example/Widget\nMD: a/c (I)V net/example/Widget/doThing\n",
            ),
            Box::new(source),
            None,
        )
    }

    /// Access rules are keyed by the deobfuscated name but run before the
    /// remap, so they see obfuscated member names in the bytes.
    #[test]
    fn chains_access_widening_and_remapping() {
        let bytes = widget_bytes();
        let access = AccessTransformer::from_config("public net/example/Widget c (I)V")
            .expect("parse config");
        let mut pipeline = Pipeline::new(Some(access), Some(remapper_for(&bytes)));

        let output = pipeline
            .transform("a", Some(bytes))
            .expect("transform")
            .expect("bytes");
        let class = ClassFile::parse(&output).expect("parse output");

        assert_eq!("net/example/Widget", class.this_class_name().expect("name"));
        assert_eq!(
            "doThing",
            class.utf8(class.methods[0].name_index).expect("method name")
        );
        assert_eq!(ACC_PUBLIC, class.methods[0].access);
        assert_eq!("net/example/Widget", pipeline.output_name("a"));
    }

    #[test]
    fn validation_catches_corrupt_output() {
        // A pipeline with no transformers still refuses to emit junk.
        let mut pipeline = Pipeline::new(None, None);
        let result = pipeline.transform("a", Some(b"not a class file".to_vec()));
        assert!(result.is_err());
    }

    #[test]
    fn missing_bytes_pass_through() {
        let bytes = widget_bytes();
        let mut pipeline = Pipeline::new(None, Some(remapper_for(&bytes)));
        let result = pipeline.transform("a", None).expect("transform");
        assert!(result.is_none());
    }
}
