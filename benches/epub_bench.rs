use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use epub::doc::EpubDoc;
use epub_parser::Epub as EpubParser;
use foxel_ebook::package::parse_package;
use foxel_ebook::zip::build_index;
use foxel_ebook::{load_epub_with, search_sections, LoadOptions, MemoryResourceStore};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const WARMUP_ITERS: usize = 2;
const MEASURE_ITERS: usize = 10;

struct TrackingAllocator;

static CURRENT_ALLOC_BYTES: AtomicUsize = AtomicUsize::new(0);
static PEAK_ALLOC_BYTES: AtomicUsize = AtomicUsize::new(0);

#[global_allocator]
static GLOBAL_ALLOCATOR: TrackingAllocator = TrackingAllocator;

fn track_alloc(size: usize) {
    let current = CURRENT_ALLOC_BYTES.fetch_add(size, Ordering::Relaxed) + size;
    PEAK_ALLOC_BYTES.fetch_max(current, Ordering::Relaxed);
}

fn track_dealloc(size: usize) {
    CURRENT_ALLOC_BYTES.fetch_sub(size, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            track_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        track_dealloc(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            track_dealloc(layout.size());
            track_alloc(new_size);
        }
        new_ptr
    }
}

/// A generated book
struct Fixture {
    key: String,
    bytes: Vec<u8>,
}

/// Book with `chapters` spine documents of `headings` sections each, plus
/// one image per chapter and a nav document.
fn synthetic_book(chapters: usize, headings: usize, paragraphs: usize) -> Fixture {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = CompressionMethod::Stored;
    let deflated = CompressionMethod::Deflated;
    let mut add = |name: &str, bytes: &[u8], method: CompressionMethod| {
        let options = SimpleFileOptions::default().compression_method(method);
        writer.start_file(name, options).expect("start member");
        writer.write_all(bytes).expect("write member");
    };

    add("mimetype", &b"application/epub+zip"[..], stored);
    add(
        "META-INF/container.xml",
        &br#"<?xml version="1.0"?><container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#[..],
        deflated,
    );

    let mut manifest = String::from(
        r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#,
    );
    let mut spine = String::new();
    let mut nav = String::new();
    for c in 1..=chapters {
        manifest.push_str(&format!(
            r#"<item id="c{c}" href="text/ch{c}.xhtml" media-type="application/xhtml+xml"/><item id="img{c}" href="images/fig{c}.png" media-type="image/png"/>"#
        ));
        spine.push_str(&format!(r#"<itemref idref="c{c}"/>"#));

        let mut body = String::new();
        for h in 1..=headings {
            let level = if h == 1 { 1 } else { 2 };
            body.push_str(&format!(
                r#"<h{level} id="c{c}-h{h}">Chapter {c} part {h}</h{level}>"#
            ));
            nav.push_str(&format!(
                r##"<li><a href="text/ch{c}.xhtml#c{c}-h{h}">Chapter {c} part {h}</a></li>"##
            ));
            for p in 0..paragraphs {
                body.push_str(&format!(
                    "<p>Paragraph {p} of chapter {c}: <em>It was a dark and stormy night</em>; \
                     the rain fell in torrents &mdash; except at occasional intervals.</p>"
                ));
            }
        }
        body.push_str(&format!(r#"<img src="../images/fig{c}.png" alt="figure"/>"#));
        let doc = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><html xmlns="http://www.w3.org/1999/xhtml"><head><title>ch{c}</title></head><body>{body}</body></html>"#
        );
        add(&format!("OEBPS/text/ch{c}.xhtml"), doc.as_bytes(), deflated);
        add(&format!("OEBPS/images/fig{c}.png"), &[0x89u8; 64][..], stored);
    }

    let nav_doc = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops"><body><nav epub:type="toc"><ol>{nav}</ol></nav></body></html>"#
    );
    add("OEBPS/nav.xhtml", nav_doc.as_bytes(), deflated);
    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid"><metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Synthetic</dc:title><dc:identifier id="uid">bench</dc:identifier><dc:language>en</dc:language></metadata><manifest>{manifest}</manifest><spine>{spine}</spine></package>"#
    );
    add("OEBPS/content.opf", opf.as_bytes(), deflated);

    let bytes = writer.finish().expect("finish zip").into_inner();
    Fixture {
        key: format!("synthetic-{}x{}x{}", chapters, headings, paragraphs),
        bytes,
    }
}

#[derive(Clone, Debug)]
struct CaseResult {
    fixture: String,
    case: String,
    median_ns: u128,
    p90_ns: u128,
    median_peak_heap_bytes: usize,
}

fn percentile<T: Copy + Ord>(samples: &mut [T], fraction: f64) -> T {
    samples.sort_unstable();
    let idx = ((samples.len().saturating_sub(1) as f64) * fraction).round() as usize;
    samples[idx]
}

fn run_case(fixture: &str, case: &str, mut op: impl FnMut() -> usize) -> CaseResult {
    for _ in 0..WARMUP_ITERS {
        black_box(op());
    }
    let mut times = Vec::with_capacity(MEASURE_ITERS);
    let mut peaks = Vec::with_capacity(MEASURE_ITERS);
    for _ in 0..MEASURE_ITERS {
        let baseline = CURRENT_ALLOC_BYTES.load(Ordering::Relaxed);
        PEAK_ALLOC_BYTES.store(baseline, Ordering::Relaxed);
        let start = Instant::now();
        black_box(op());
        times.push(start.elapsed().as_nanos());
        peaks.push(PEAK_ALLOC_BYTES.load(Ordering::Relaxed).saturating_sub(baseline));
    }
    CaseResult {
        fixture: fixture.to_string(),
        case: case.to_string(),
        median_ns: percentile(&mut times, 0.5),
        p90_ns: percentile(&mut times, 0.9),
        median_peak_heap_bytes: percentile(&mut peaks, 0.5),
    }
}

fn main() {
    let fixtures = [
        synthetic_book(5, 3, 10),
        synthetic_book(40, 5, 20),
        synthetic_book(120, 8, 12),
    ];

    println!("# foxel-ebook benchmark (synthetic corpus)");
    println!("# warmup_iters={}, measure_iters={}", WARMUP_ITERS, MEASURE_ITERS);
    println!("fixture,case,median_ns,p90_ns,median_peak_heap_bytes");

    let mut results = Vec::new();
    for fixture in &fixtures {
        let bytes = fixture.bytes.as_slice();
        let key = fixture.key.as_str();

        results.push(run_case(key, "zip/build_index", || {
            build_index(bytes).expect("index").len()
        }));
        results.push(run_case(key, "parse/package", || {
            let index = build_index(bytes).expect("index");
            parse_package(bytes, &index).expect("package").spine.len()
        }));
        results.push(run_case(key, "load/full_book", || {
            let store = Arc::new(MemoryResourceStore::new());
            let book = load_epub_with(bytes, store, &LoadOptions::default()).expect("load");
            book.sections().len() + book.toc().len()
        }));
        results.push(run_case(key, "load/full_book_and_search", || {
            let store = Arc::new(MemoryResourceStore::new());
            let book = load_epub_with(bytes, store, &LoadOptions::default()).expect("load");
            search_sections(book.sections(), "stormy", 50).len()
        }));
        results.push(run_case(key, "compare/epub-rs/open_and_read_all", || {
            let mut doc = EpubDoc::from_reader(Cursor::new(bytes.to_vec())).expect("epub-rs");
            let mut total = 0;
            loop {
                if let Some((content, _mime)) = doc.get_current_str() {
                    total += content.len();
                }
                if !doc.go_next() {
                    break;
                }
            }
            total
        }));
        results.push(run_case(key, "compare/epub-parser/parse", || {
            EpubParser::parse_from_buffer(bytes)
                .expect("epub-parser")
                .pages
                .len()
        }));
    }

    for r in &results {
        println!(
            "{},{},{},{},{}",
            r.fixture, r.case, r.median_ns, r.p90_ns, r.median_peak_heap_bytes
        );
    }

    println!("# summary");
    println!("fixture,metric,foxel_median_ns,other_median_ns,ratio_x");
    let median = |fixture: &str, case: &str| -> f64 {
        results
            .iter()
            .find(|r| r.fixture == fixture && r.case == case)
            .map(|r| r.median_ns as f64)
            .unwrap_or(f64::NAN)
    };
    for fixture in &fixtures {
        for (label, other) in [
            ("load vs epub-rs", "compare/epub-rs/open_and_read_all"),
            ("load vs epub-parser", "compare/epub-parser/parse"),
        ] {
            let ours = median(&fixture.key, "load/full_book");
            let theirs = median(&fixture.key, other);
            println!(
                "{},{},{:.0},{:.0},{:.2}",
                fixture.key,
                label,
                ours,
                theirs,
                theirs / ours
            );
        }
    }
}
