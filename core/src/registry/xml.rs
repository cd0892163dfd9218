//! Registry document codec.
//!
//! ```xml
//! <root>
//!   <nextId>6</nextId>
//!   <server>
//!     <name>SrvA</name>
//!     <host>localhost</host>
//!     <database>
//!       <id>5</id>
//!       <name>DbA</name>
//!       <path>/data/a.fdb</path>
//!     </database>
//!   </server>
//! </root>
//! ```
//!
//! Unknown elements are skipped. Empty fields are omitted on output.

use std::mem;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::state::MAX_ID;
use crate::error::{CatalogError, CatalogResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDocument {
    pub next_id: Option<u64>,
    pub servers: Vec<ServerRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerRecord {
    pub name: String,
    pub host: String,
    pub port: String,
    pub databases: Vec<DatabaseRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseRecord {
    pub id: Option<u64>,
    pub name: String,
    pub path: String,
    pub charset: String,
    pub username: String,
    pub password: String,
    pub role: String,
    pub authentication: String,
    /// Legacy flag from documents predating `authentication`.
    pub encrypted: bool,
}

const ROOT: &str = "root";
const NEXT_ID: &str = "nextId";
const SERVER: &str = "server";
const DATABASE: &str = "database";

#[derive(Default)]
struct Parser {
    document: RegistryDocument,
    stack: Vec<String>,
    text: String,
    server: Option<ServerRecord>,
    database: Option<DatabaseRecord>,
    seen_root: bool,
}

impl Parser {
    fn start(&mut self, name: String) -> CatalogResult<()> {
        if self.stack.is_empty() {
            if self.seen_root || name != ROOT {
                return Err(CatalogError::MalformedRegistry(format!(
                    "unexpected top-level element <{name}>"
                )));
            }
            self.seen_root = true;
        } else if self.path_is(&[ROOT]) && name == SERVER {
            self.server = Some(ServerRecord::default());
        } else if self.path_is(&[ROOT, SERVER]) && name == DATABASE {
            self.database = Some(DatabaseRecord::default());
        }
        self.stack.push(name);
        self.text.clear();
        Ok(())
    }

    fn end(&mut self) {
        let Some(name) = self.stack.pop() else {
            return;
        };
        // Leaf text is kept verbatim; only numeric and flag fields are trimmed.
        let value = mem::take(&mut self.text);

        if self.path_is(&[ROOT]) {
            match name.as_str() {
                SERVER => {
                    if let Some(server) = self.server.take() {
                        self.document.servers.push(server);
                    }
                }
                NEXT_ID => match value.trim().parse::<u64>() {
                    Ok(next) if next <= MAX_ID + 1 => self.document.next_id = Some(next),
                    Ok(next) => log::warn!("ignoring out-of-range nextId {next}"),
                    Err(_) if value.trim().is_empty() => {}
                    Err(_) => log::warn!("ignoring unparsable nextId {value:?}"),
                },
                _ => {}
            }
        } else if self.path_is(&[ROOT, SERVER]) {
            let Some(server) = self.server.as_mut() else {
                return;
            };
            match name.as_str() {
                DATABASE => {
                    if let Some(database) = self.database.take() {
                        server.databases.push(database);
                    }
                }
                "name" => server.name = value,
                "host" => server.host = value,
                "port" => server.port = value,
                _ => {}
            }
        } else if self.path_is(&[ROOT, SERVER, DATABASE]) {
            let Some(database) = self.database.as_mut() else {
                return;
            };
            match name.as_str() {
                "id" => {
                    database.id = value.trim().parse().ok().filter(|id| *id <= MAX_ID);
                }
                "name" => database.name = value,
                "path" => database.path = value,
                "charset" => database.charset = value,
                "username" => database.username = value,
                "password" => database.password = value,
                "role" => database.role = value,
                "authentication" => database.authentication = value,
                "encrypted" => database.encrypted = value.trim() == "1",
                _ => {}
            }
        }
    }

    fn path_is(&self, path: &[&str]) -> bool {
        self.stack.len() == path.len()
            && self
                .stack
                .iter()
                .zip(path)
                .all(|(element, expected)| element == expected)
    }

    fn finish(self) -> CatalogResult<RegistryDocument> {
        if !self.seen_root {
            return Err(CatalogError::MalformedRegistry("missing <root> element".into()));
        }
        if let Some(open) = self.stack.last() {
            return Err(CatalogError::MalformedRegistry(format!(
                "element <{open}> is not closed"
            )));
        }
        Ok(self.document)
    }
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

/// Parses a whole document. Nothing is returned unless all of it is valid.
pub fn parse(text: &str) -> CatalogResult<RegistryDocument> {
    let mut reader = Reader::from_str(text);
    let mut parser = Parser::default();

    loop {
        match reader.read_event()? {
            Event::Start(start) => parser.start(element_name(&start))?,
            Event::Empty(start) => {
                parser.start(element_name(&start))?;
                parser.end();
            }
            Event::Text(text) => parser.text.push_str(&text.unescape()?),
            Event::CData(data) => parser
                .text
                .push_str(&String::from_utf8_lossy(&data.into_inner())),
            Event::End(_) => parser.end(),
            Event::Eof => break,
            _ => {}
        }
    }
    parser.finish()
}

fn write_field(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) -> CatalogResult<()> {
    if value.is_empty() {
        return Ok(());
    }
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Renders a document. `nextId` always comes first.
pub fn render(document: &RegistryDocument) -> CatalogResult<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new(ROOT)))?;

    let next_id = document.next_id.unwrap_or(1).to_string();
    write_field(&mut writer, NEXT_ID, &next_id)?;

    for server in &document.servers {
        writer.write_event(Event::Start(BytesStart::new(SERVER)))?;
        write_field(&mut writer, "name", &server.name)?;
        write_field(&mut writer, "host", &server.host)?;
        write_field(&mut writer, "port", &server.port)?;
        for database in &server.databases {
            writer.write_event(Event::Start(BytesStart::new(DATABASE)))?;
            let id = database.id.map(|id| id.to_string()).unwrap_or_default();
            write_field(&mut writer, "id", &id)?;
            write_field(&mut writer, "name", &database.name)?;
            write_field(&mut writer, "path", &database.path)?;
            write_field(&mut writer, "charset", &database.charset)?;
            write_field(&mut writer, "username", &database.username)?;
            write_field(&mut writer, "password", &database.password)?;
            write_field(&mut writer, "role", &database.role)?;
            write_field(&mut writer, "authentication", &database.authentication)?;
            writer.write_event(Event::End(BytesEnd::new(DATABASE)))?;
        }
        writer.write_event(Event::End(BytesEnd::new(SERVER)))?;
    }

    writer.write_event(Event::End(BytesEnd::new(ROOT)))?;
    let mut output = String::from_utf8(writer.into_inner())
        .map_err(|err| CatalogError::MalformedRegistry(err.to_string()))?;
    output.push('\n');
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_servers_databases_and_counter() {
        let document = parse(
            r#"<?xml version="1.0"?>
            <root>
              <server>
                <name>SrvA</name><host>localhost</host><port/>
                <database>
                  <id>5</id><name>DbA</name><path>/data/a &amp; b.fdb</path>
                  <encrypted>1</encrypted>
                  <unknown>ignored</unknown>
                </database>
              </server>
              <nextId>9</nextId>
            </root>"#,
        )
        .unwrap();

        assert_eq!(document.next_id, Some(9));
        let server = &document.servers[0];
        assert_eq!(
            (server.name.as_str(), server.host.as_str(), server.port.as_str()),
            ("SrvA", "localhost", "")
        );
        let database = &server.databases[0];
        assert_eq!(database.id, Some(5));
        assert_eq!(database.path, "/data/a & b.fdb");
        assert!(database.encrypted);
    }

    #[test]
    fn unparsable_id_means_no_id() {
        let document =
            parse("<root><server><database><id>five</id></database></server></root>").unwrap();
        assert_eq!(document.servers[0].databases[0].id, None);
        assert_eq!(document.next_id, None);
    }

    #[test]
    fn ids_beyond_the_allocator_range_are_dropped() {
        let document = parse(
            "<root><nextId>18446744073709551615</nextId><server><database>\
             <id>18446744073709551615</id></database></server></root>",
        )
        .unwrap();
        assert_eq!(document.servers[0].databases[0].id, None);
        assert_eq!(document.next_id, None);
    }

    #[test]
    fn leaf_whitespace_survives_a_round_trip() {
        let document = RegistryDocument {
            next_id: Some(2),
            servers: vec![ServerRecord {
                name: "SrvA".into(),
                databases: vec![DatabaseRecord {
                    id: Some(1),
                    name: "DbA".into(),
                    path: " /data/a.fdb ".into(),
                    password: "  pass word ".into(),
                    role: " ".into(),
                    ..DatabaseRecord::default()
                }],
                ..ServerRecord::default()
            }],
        };
        let reparsed = parse(&render(&document).unwrap()).unwrap();
        let database = &reparsed.servers[0].databases[0];
        assert_eq!(database.path, " /data/a.fdb ");
        assert_eq!(database.password, "  pass word ");
        assert_eq!(database.role, " ");
        assert_eq!(reparsed, document);
    }

    #[test]
    fn wrong_root_is_malformed() {
        assert!(matches!(
            parse("<servers><server/></servers>"),
            Err(CatalogError::MalformedRegistry(_))
        ));
        assert!(matches!(parse(""), Err(CatalogError::MalformedRegistry(_))));
    }

    #[test]
    fn truncated_document_is_rejected() {
        assert!(parse("<root><server><name>SrvA</name>").is_err());
    }

    #[test]
    fn render_omits_empty_fields_and_keeps_counter() {
        let empty = render(&RegistryDocument {
            next_id: Some(3),
            servers: Vec::new(),
        })
        .unwrap();
        assert!(empty.contains("<nextId>3</nextId>"));
        assert!(!empty.contains("<server>"));

        let document = RegistryDocument {
            next_id: Some(6),
            servers: vec![ServerRecord {
                name: "SrvA".into(),
                host: "localhost".into(),
                port: String::new(),
                databases: vec![DatabaseRecord {
                    id: Some(5),
                    name: "DbA".into(),
                    path: "/data/<a>.fdb".into(),
                    ..DatabaseRecord::default()
                }],
            }],
        };
        let text = render(&document).unwrap();
        assert!(!text.contains("<port>"));
        assert!(!text.contains("<charset>"));
        assert!(text.find("<nextId>").unwrap() < text.find("<server>").unwrap());
        assert_eq!(parse(&text).unwrap(), document);
    }
}
