pub mod core;
pub mod compression;
pub mod io;
pub mod mmap;
pub mod storage;
pub mod schema;
pub mod analysis;
pub mod dict;
pub mod index;
pub mod attr;
pub mod search;
pub mod merge;
pub mod check;

/*
┌──────────────────────────────────────────────────────────────────────────────┐
│                           SKALD STRUCT ARCHITECTURE                           │
└──────────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────────── BUILD PATH ─────────────────────────────────┐
│                                                                               │
│  ┌────────────────────────────────────────────────────────────────────┐     │
│  │                         struct Indexer                              │     │
│  │  settings: IndexerSettings      // config + schema + tokenizer      │     │
│  │  stop: StopFlag                 // cooperative cancellation         │     │
│  │  progress: Option<Box<FnMut>>   // per-document callback            │     │
│  └────────────────────────────────────────────────────────────────────┘     │
│                                                                               │
│  DocumentSource ──▶ Tokenizer ──▶ Dictionary::get_word_id ──▶ HitBuffer      │
│       │              (chain: multiforms, bigrams)                │           │
│       │                                                     sort + spill     │
│       ├──▶ RowPool ──sort──▶ RowMerge ──▶ .spa + AttrIndexBuilder (min/max)  │
│       ├──▶ StringHeapWriter ──▶ .sps        MvaSidecarWriter ──▶ .spm        │
│       └──▶ KillList ──▶ .spk                                                 │
│                                                                               │
│  Bin × N ──▶ HitMerge (heap) ──▶ HitBuilder ──▶ .spd / .spp / .spe           │
│                                       │                                       │
│                                       ├──▶ CrcDictWriter | KeywordsDictWriter │
│                                       └──▶ InfixBuilder ──▶ .spi              │
│                                                                               │
│  IndexHeader ──▶ .sph (written last)     FileSet::juggle per output file     │
└───────────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────────── SEARCH PATH ────────────────────────────────┐
│                                                                               │
│  ┌────────────────────────────────────────────────────────────────────┐     │
│  │                         struct DiskIndex                            │     │
│  │  header: IndexHeader            // .sph                             │     │
│  │  attrs: RwLock<Vec<u32>>        // .spa rows + min/max tail         │     │
│  │  strings: RwLock<Vec<u8>>       // .sps heap                        │     │
│  │  doclist/hitlist/dict: MmapFile // .spd .spp .spi, read-only        │     │
│  │  wordlist: Wordlist             // checkpoints + block cache        │     │
│  │  hash: DocinfoHash              // docid -> row                     │     │
│  │  arena: MvaArena                // live-updated MVA lists           │     │
│  │  kill: KillList                 // .spk                             │     │
│  └────────────────────────────────────────────────────────────────────┘     │
│                                                                               │
│  term ──▶ DictSettings::normalize ──▶ Wordlist lookup ──▶ PostingReader       │
│                 (stopwords, wordforms, stemmers)             (skip_to)        │
│                                                                               │
│  QueryContext { FilterTree, overrides, calc stages } ──▶ full_scan | matcher  │
│                                                                               │
│  update_attributes ──▶ rows / MvaArena / json ──▶ save_attributes ──▶ juggle  │
│  Merger (two indexes + filter + kill lists) ──▶ fresh file family             │
│  check::check ──▶ CheckReport (≤ 100 failures)                                │
└───────────────────────────────────────────────────────────────────────────────┘
*/
