use crate::classfile::{
    ACC_PUBLIC, ACC_SUPER, AttributeInfo, ClassFile, Const, FieldInfo, MethodInfo,
};

/// Builds small synthetic class files for tests through the crate's own
/// serializer, so no fixtures need to be downloaded or checked in.
pub(crate) struct ClassBuilder {
    class: ClassFile,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str, super_name: &str) -> ClassBuilder {
        let mut class = ClassFile {
            minor_version: 0,
            major_version: 52,
            pool: vec![Const::Reserved],
            access: ACC_PUBLIC | ACC_SUPER,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        };
        class.this_class = class.intern_class(name);
        class.super_class = class.intern_class(super_name);
        ClassBuilder { class }
    }

    pub(crate) fn interface(mut self, name: &str) -> Self {
        let index = self.class.intern_class(name);
        self.class.interfaces.push(index);
        self
    }

    pub(crate) fn field(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        let name_index = self.class.intern_utf8(name);
        let descriptor_index = self.class.intern_utf8(descriptor);
        self.class.fields.push(FieldInfo {
            access,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
        self
    }

    pub(crate) fn method(mut self, access: u16, name: &str, descriptor: &str, code: Vec<u8>) -> Self {
        let name_index = self.class.intern_utf8(name);
        let descriptor_index = self.class.intern_utf8(descriptor);
        let attributes = if code.is_empty() {
            Vec::new()
        } else {
            vec![code_attribute(&mut self.class, &code)]
        };
        self.class.methods.push(MethodInfo {
            access,
            name_index,
            descriptor_index,
            attributes,
        });
        self
    }

    /// Intern a method ref up front so tests can embed its index in code.
    pub(crate) fn method_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        self.class.intern_method_ref(class_name, name, descriptor)
    }

    pub(crate) fn field_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        self.class.intern_field_ref(class_name, name, descriptor)
    }

    pub(crate) fn build(self) -> ClassFile {
        self.class
    }
}

pub(crate) fn operand(index: u16) -> [u8; 2] {
    index.to_be_bytes()
}

fn code_attribute(class: &mut ClassFile, code: &[u8]) -> AttributeInfo {
    let name_index = class.intern_utf8("Code");
    let mut info = Vec::new();
    info.extend_from_slice(&8u16.to_be_bytes());
    info.extend_from_slice(&8u16.to_be_bytes());
    info.extend_from_slice(&(code.len() as u32).to_be_bytes());
    info.extend_from_slice(code);
    info.extend_from_slice(&0u16.to_be_bytes());
    info.extend_from_slice(&0u16.to_be_bytes());
    AttributeInfo { name_index, info }
}

/// Bytes of the code array inside a method's Code attribute.
pub(crate) fn code_of(class: &ClassFile, method_name: &str) -> Vec<u8> {
    for method in &class.methods {
        if class.utf8(method.name_index).expect("method name") != method_name {
            continue;
        }
        for attribute in &method.attributes {
            if class.is_code_attribute(attribute) {
                let length =
                    u32::from_be_bytes(attribute.info[4..8].try_into().expect("code length"))
                        as usize;
                return attribute.info[8..8 + length].to_vec();
            }
        }
    }
    panic!("method {method_name} has no Code attribute");
}
