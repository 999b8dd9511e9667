//! PDML element conventions on top of `quick_xml`.

use quick_xml::Reader;
use quick_xml::events::BytesStart;

use crate::field::Field;

pub(crate) type PdmlReader<'a> = Reader<&'a [u8]>;

pub(crate) fn pdml_reader(input: &[u8]) -> PdmlReader<'_> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);
    reader
}

/// Attributes PDML puts on `<packet>`, `<proto>` and `<field>`.
#[derive(Debug, Default)]
pub(crate) struct ElementAttrs {
    pub name: String,
    pub showname: String,
    pub value: String,
    pub show: String,
    pub hide: bool,
    pub pos: Option<usize>,
    pub size: Option<usize>,
    pub unmasked: String,
    pub num: Option<String>,
}

impl ElementAttrs {
    pub fn read(tag: &BytesStart<'_>) -> Result<Self, String> {
        let mut attrs = ElementAttrs::default();
        for attr in tag.attributes() {
            let attr = attr.map_err(|err| err.to_string())?;
            let value = attr
                .unescape_value()
                .map_err(|err| err.to_string())?
                .into_owned();
            match attr.key.as_ref() {
                b"name" => attrs.name = value,
                b"showname" => attrs.showname = value,
                b"value" => attrs.value = value,
                b"show" => attrs.show = value,
                b"hide" => attrs.hide = value == "yes",
                b"pos" => attrs.pos = value.parse().ok(),
                b"size" => attrs.size = value.parse().ok(),
                b"unmaskedvalue" => attrs.unmasked = value,
                b"num" => attrs.num = Some(value),
                _ => {}
            }
        }
        Ok(attrs)
    }

    /// Build a field; positions are only kept when `include_raw` is set.
    pub fn into_field(self, include_raw: bool) -> Field {
        let mut field = Field::new(self.name)
            .with_show(self.show)
            .with_raw_value(self.value)
            .with_showname(self.showname);
        field.hide = self.hide;
        field.unmasked_value = self.unmasked;
        if include_raw {
            field.pos = self.pos;
            field.size = self.size;
        }
        field
    }
}
