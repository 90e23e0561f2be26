//! Flat view of the inverter's XML status documents.
//!
//! Both `meters.xml` and `data.xml` are a single root element holding one
//! child element per reading, e.g. `<response><OutputPower>1.2</OutputPower></response>`.
//! Only that first level is kept.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub tag: String,
    pub text: String,
}

/// Top-level children of a fetched document, in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    fields: Vec<Field>,
}

impl ParsedDocument {
    pub fn parse(text: &str) -> Result<Self, roxmltree::Error> {
        let document = roxmltree::Document::parse(text)?;
        let fields = document
            .root_element()
            .children()
            .filter(|node| node.is_element())
            .map(|node| Field {
                tag: node.tag_name().name().to_string(),
                text: node.text().unwrap_or_default().to_string(),
            })
            .collect();
        Ok(Self { fields })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Text of the first field with the given tag.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.tag == tag)
            .map(|field| field.text.as_str())
    }
}

impl FromIterator<Field> for ParsedDocument {
    fn from_iter<T: IntoIterator<Item = Field>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Drops every non-ASCII byte. The inverter prefixes its documents with a
/// byte-order mark that the XML parser rejects.
pub fn sanitize(body: &[u8]) -> String {
    body.iter()
        .filter(|byte| byte.is_ascii())
        .map(|&byte| byte as char)
        .collect()
}
