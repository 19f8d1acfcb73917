use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use foxel_ebook::zip::build_index;
use foxel_ebook::{
    load_document, load_epub_with, search_sections, Assembly, DocumentFormat, EpubError,
    LoadOptions, LoadedBook, MemoryResourceStore, Section, TocItem,
};

#[derive(Clone, Debug)]
enum Json {
    Null,
    Bool(bool),
    Num(usize),
    Str(String),
    Arr(Vec<Json>),
    Obj(Vec<(String, Json)>),
}

impl Json {
    fn obj<const N: usize>(fields: [(&str, Json); N]) -> Json {
        Json::Obj(
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    fn opt(value: Option<&str>) -> Json {
        value.map_or(Json::Null, |v| Json::Str(v.to_string()))
    }

    fn render(&self, pretty: bool) -> String {
        let mut out = String::new();
        self.write_into(&mut out, pretty, 0);
        out
    }

    fn write_into(&self, out: &mut String, pretty: bool, depth: usize) {
        match self {
            Json::Null => out.push_str("null"),
            Json::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
            Json::Num(v) => out.push_str(&v.to_string()),
            Json::Str(v) => write_json_string(out, v),
            Json::Arr(items) => write_seq(out, pretty, depth, ('[', ']'), items, |out, item| {
                item.write_into(out, pretty, depth + 1)
            }),
            Json::Obj(fields) => {
                write_seq(out, pretty, depth, ('{', '}'), fields, |out, (key, value)| {
                    write_json_string(out, key);
                    out.push_str(if pretty { ": " } else { ":" });
                    value.write_into(out, pretty, depth + 1);
                })
            }
        }
    }
}

fn write_seq<T>(
    out: &mut String,
    pretty: bool,
    depth: usize,
    (open, close): (char, char),
    items: &[T],
    mut write_item: impl FnMut(&mut String, &T),
) {
    out.push(open);
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        if pretty {
            out.push('\n');
            out.push_str(&"  ".repeat(depth + 1));
        }
        write_item(out, item);
    }
    if pretty && !items.is_empty() {
        out.push('\n');
        out.push_str(&"  ".repeat(depth));
    }
    out.push(close);
}

fn write_json_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c <= '\u{1f}' => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn main() -> ExitCode {
    match run(env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", msg);
            ExitCode::FAILURE
        }
    }
}

/// A loaded document of any supported format
enum Loaded {
    Epub(LoadedBook),
    Other(Assembly),
}

impl Loaded {
    fn sections(&self) -> &[Section] {
        match self {
            Loaded::Epub(book) => book.sections(),
            Loaded::Other(assembly) => &assembly.sections,
        }
    }

    fn toc(&self) -> &[TocItem] {
        match self {
            Loaded::Epub(book) => book.toc(),
            Loaded::Other(assembly) => &assembly.toc,
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let mut rest = args.into_iter().skip(1).collect::<Vec<_>>();
    let pretty = pop_flag(&mut rest, "--pretty");
    let options = if pop_flag(&mut rest, "--strict") {
        LoadOptions::builder().strict().build()
    } else {
        LoadOptions::default()
    };

    if rest.is_empty() || rest[0] == "--help" || rest[0] == "-h" {
        print_help();
        return Ok(());
    }

    let cmd = rest.remove(0);
    match cmd.as_str() {
        "entries" => {
            let path = first_arg(&rest, "entries requires <epub_path>")?;
            let data = read_file(&path)?;
            let index = build_index(&data).map_err(display_err)?;
            let entries = index
                .entries()
                .map(|meta| {
                    Json::obj([
                        ("name", Json::Str(meta.file_name.clone())),
                        ("method", Json::Num(meta.compression_method as usize)),
                        ("compressed_size", Json::Num(meta.compressed_size as usize)),
                        ("size", Json::Num(meta.uncompressed_size as usize)),
                    ])
                })
                .collect::<Vec<_>>();
            let output = Json::obj([
                ("file", Json::Str(path)),
                ("count", Json::Num(entries.len())),
                ("entries", Json::Arr(entries)),
            ]);
            println!("{}", output.render(pretty));
        }
        "package" => {
            let path = first_arg(&rest, "package requires <epub_path>")?;
            let book = load_epub_file(&path, &options)?;
            let package = book.package();
            let manifest = package
                .manifest
                .iter()
                .map(|item| {
                    Json::obj([
                        ("id", Json::Str(item.id.clone())),
                        ("href", Json::Str(item.href.clone())),
                        ("media_type", Json::Str(item.media_type.clone())),
                        ("properties", Json::opt(item.properties.as_deref())),
                    ])
                })
                .collect::<Vec<_>>();
            let spine = package
                .spine
                .iter()
                .map(|item| {
                    Json::obj([
                        ("idref", Json::Str(item.idref.clone())),
                        ("linear", Json::Bool(item.linear)),
                    ])
                })
                .collect::<Vec<_>>();
            let metadata = &package.metadata;
            let output = Json::obj([
                ("file", Json::Str(path)),
                ("opf_path", Json::Str(package.opf_path.clone())),
                ("title", Json::opt(metadata.title.as_deref())),
                ("creator", Json::opt(metadata.creator.as_deref())),
                ("language", Json::opt(metadata.language.as_deref())),
                ("identifier", Json::opt(metadata.identifier.as_deref())),
                ("manifest", Json::Arr(manifest)),
                ("spine", Json::Arr(spine)),
            ]);
            println!("{}", output.render(pretty));
        }
        "sections" => {
            let mut args = rest;
            let ndjson = pop_flag(&mut args, "--ndjson");
            let path = first_arg(&args, "sections requires <file>")?;
            let loaded = load_any(&path, &options)?;
            if ndjson {
                for (index, section) in loaded.sections().iter().enumerate() {
                    println!("{}", section_json(index, section).render(false));
                }
            } else {
                let sections = loaded
                    .sections()
                    .iter()
                    .enumerate()
                    .map(|(index, section)| section_json(index, section))
                    .collect::<Vec<_>>();
                let output = Json::obj([
                    ("file", Json::Str(path)),
                    ("count", Json::Num(sections.len())),
                    ("sections", Json::Arr(sections)),
                ]);
                println!("{}", output.render(pretty));
            }
        }
        "section" => {
            let mut args = rest;
            let raw = pop_flag(&mut args, "--raw");
            let path = first_arg(&args, "section requires <file>")?;
            let selector = parse_selector(&args)?;
            let loaded = load_any(&path, &options)?;
            let index = match selector {
                Selector::Index(index) => index,
                Selector::Id(id) => loaded
                    .sections()
                    .iter()
                    .position(|s| s.id == id || s.anchors.contains(&id))
                    .ok_or_else(|| format!("no section with id '{}'", id))?,
            };
            let section = loaded.sections().get(index).ok_or_else(|| {
                format!(
                    "section index {} out of range ({} sections)",
                    index,
                    loaded.sections().len()
                )
            })?;
            if raw {
                print!("{}", section.html);
            } else {
                let output = Json::obj([
                    ("file", Json::Str(path.clone())),
                    ("section", section_json(index, section)),
                    ("html", Json::Str(section.html.clone())),
                    ("text", Json::Str(section.plain_text.clone())),
                ]);
                println!("{}", output.render(pretty));
            }
        }
        "toc" => {
            let path = first_arg(&rest, "toc requires <file>")?;
            let loaded = load_any(&path, &options)?;
            let source = match &loaded {
                Loaded::Epub(book) => format!("{:?}", book.toc_source()),
                Loaded::Other(_) => "Headings".to_string(),
            };
            let toc = loaded.toc().iter().map(toc_json).collect::<Vec<_>>();
            let output = Json::obj([
                ("file", Json::Str(path)),
                ("source", Json::Str(source)),
                ("toc", Json::Arr(toc)),
            ]);
            println!("{}", output.render(pretty));
        }
        "search" => {
            let mut args = rest;
            let limit = pop_value(&mut args, "--limit")?
                .map(|v| {
                    v.parse::<usize>()
                        .map_err(|_| format!("invalid --limit value '{}'", v))
                })
                .transpose()?
                .unwrap_or(foxel_ebook::search::DEFAULT_SEARCH_LIMIT);
            let path = first_arg(&args, "search requires <file> <keyword>")?;
            let keyword = args
                .get(1)
                .cloned()
                .ok_or_else(|| "search requires <file> <keyword>".to_string())?;
            let loaded = load_any(&path, &options)?;
            let hits = search_sections(loaded.sections(), &keyword, limit)
                .into_iter()
                .map(|hit| {
                    Json::obj([
                        ("section_index", Json::Num(hit.section_index)),
                        (
                            "section_id",
                            Json::Str(loaded.sections()[hit.section_index].id.clone()),
                        ),
                        ("snippet", Json::Str(hit.snippet)),
                    ])
                })
                .collect::<Vec<_>>();
            let output = Json::obj([
                ("file", Json::Str(path)),
                ("keyword", Json::Str(keyword)),
                ("count", Json::Num(hits.len())),
                ("hits", Json::Arr(hits)),
            ]);
            println!("{}", output.render(pretty));
        }
        _ => {
            return Err(format!(
                "unknown command '{}'; run `foxel-ebook --help` for usage",
                cmd
            ));
        }
    }
    Ok(())
}

#[derive(Clone, Debug)]
enum Selector {
    Index(usize),
    Id(String),
}

fn parse_selector(args: &[String]) -> Result<Selector, String> {
    let mut args = args.to_vec();
    let index = pop_value(&mut args, "--index")?;
    let id = pop_value(&mut args, "--id")?;
    match (index, id) {
        (Some(_), Some(_)) => Err("use only one selector: --index <n> or --id <id>".to_string()),
        (Some(v), None) => v
            .parse::<usize>()
            .map(Selector::Index)
            .map_err(|_| format!("invalid --index value '{}'", v)),
        (None, Some(v)) => Ok(Selector::Id(v)),
        (None, None) => Err("section requires a selector: --index <n> or --id <id>".to_string()),
    }
}

fn read_file(path: &str) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("cannot read '{}': {}", path, e))
}

fn load_epub_file(path: &str, options: &LoadOptions) -> Result<LoadedBook, String> {
    let data = read_file(path)?;
    load_epub_with(&data, Arc::new(MemoryResourceStore::new()), options).map_err(display_err)
}

fn load_any(path: &str, options: &LoadOptions) -> Result<Loaded, String> {
    let format = DocumentFormat::from_path(path);
    if format == DocumentFormat::Epub {
        return load_epub_file(path, options).map(Loaded::Epub);
    }
    let data = read_file(path)?;
    load_document(format, &data, &options.sanitize)
        .map(Loaded::Other)
        .ok_or_else(|| format!("cannot load '{}'", path))
}

fn first_arg(args: &[String], msg: &str) -> Result<String, String> {
    args.first().cloned().ok_or_else(|| msg.to_string())
}

fn pop_flag(args: &mut Vec<String>, flag: &str) -> bool {
    if let Some(pos) = args.iter().position(|a| a == flag) {
        args.remove(pos);
        true
    } else {
        false
    }
}

fn pop_value(args: &mut Vec<String>, flag: &str) -> Result<Option<String>, String> {
    let Some(pos) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        return Err(format!("{} requires a value", flag));
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn section_json(index: usize, section: &Section) -> Json {
    Json::obj([
        ("index", Json::Num(index)),
        ("id", Json::Str(section.id.clone())),
        ("title", Json::Str(section.title.clone())),
        ("level", Json::Num(section.level as usize)),
        ("source", Json::Str(section.source.clone())),
        ("chars", Json::Num(section.plain_text.chars().count())),
    ])
}

fn toc_json(item: &TocItem) -> Json {
    Json::obj([
        ("id", Json::Str(item.id.clone())),
        ("title", Json::Str(item.title.clone())),
        ("level", Json::Num(item.level as usize)),
        ("href", Json::opt(item.href.as_deref())),
        ("section_index", Json::Num(item.section_index)),
    ])
}

fn display_err(err: EpubError) -> String {
    err.to_string()
}

fn print_help() {
    println!(
        "foxel-ebook\n\
         \n\
         Usage:\n\
         \x20 foxel-ebook [--pretty] [--strict] <command> [args]\n\
         \n\
         Commands:\n\
         \x20 entries <epub>                          list archive members\n\
         \x20 package <epub>                          metadata, manifest and spine\n\
         \x20 sections <file> [--ndjson]              sections of any supported document\n\
         \x20 section <file> (--index <n> | --id <id>) [--raw]\n\
         \x20                                         one section's markup and text\n\
         \x20 toc <file>                              resolved table of contents\n\
         \x20 search <file> <keyword> [--limit <n>]   keyword search with snippets\n\
         \n\
         Supported files: .epub, .txt, .md/.markdown, .html/.xhtml/.htm\n\
         (anything else is read as plain text)"
    );
}
