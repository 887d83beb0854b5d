use crate::error::HeapError;
use crate::growers::ArenaGrower;
use crate::tag::{write_tags, Tag};
use crate::util::write_word;

use self::format::{CompactFormatter, SpanArgsLayer};

use super::*;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};


const BUF_SIZE: usize = 64 * 1024;
const D: usize = DIRECTORY_WIDTH;

/// Installs a global subscriber printing events selected by `RUST_LOG`.
fn init_logging() {
    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(SpanArgsLayer::default())
        .with(
            tracing_subscriber::fmt::Layer::new()
                .event_format(CompactFormatter)
                .with_test_writer(),
        );
    // Another test may have installed it already.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn allocator(capacity: usize) -> SegMalloc<ArenaGrower> {
    SegMalloc::with_grower(ArenaGrower::new(capacity)).unwrap()
}

fn width_of(allocator: &SegMalloc<ArenaGrower>, p: Payload) -> usize {
    allocator.usable_size(p) + BLOCK_OVERHEAD
}

fn free_block(offset: usize, width: usize) -> BlockInfo {
    BlockInfo {
        offset,
        width,
        state: State::Free,
    }
}

#[test]
fn test_1() {
    init_logging();
    let allocator = allocator(BUF_SIZE);

    assert_eq!(allocator.heap_size(), DIRECTORY_WIDTH);
    assert_eq!(
        allocator.blocks().collect::<Vec<_>>(),
        vec![BlockInfo {
            offset: 0,
            width: DIRECTORY_WIDTH,
            state: State::Reserved
        }]
    );
    assert_eq!(allocator.free_blocks().count(), 0);
    allocator.check().unwrap();
}

#[test]
fn test_2() {
    // Not even the directory fits.
    let result = SegMalloc::with_grower(ArenaGrower::new(DIRECTORY_WIDTH - 8));
    assert_eq!(
        result.err(),
        Some(AllocError::OutOfMemory(GrowError::Exhausted {
            requested: DIRECTORY_WIDTH,
            available: DIRECTORY_WIDTH - 8
        }))
    );
}

#[test]
fn test_3() {
    let mut allocator = allocator(BUF_SIZE);

    let p = allocator.allocate(100).unwrap();
    assert_eq!(allocator.as_ptr(p) as usize % ALIGNMENT, 0);
    assert_eq!(p.offset() % ALIGNMENT, 0);
    assert!(allocator.usable_size(p) >= 100);
    assert_eq!(width_of(&allocator, p), 120);

    // The heap grew by two blocks, the first one is kept for later.
    assert_eq!(p.offset(), D + 120 + TAG_SIZE);
    assert_eq!(allocator.heap_size(), D + 240);
    assert_eq!(
        allocator.free_blocks().collect::<Vec<_>>(),
        vec![free_block(D, 120)]
    );
    allocator.check().unwrap();
}

#[test]
fn test_4() {
    let mut allocator = allocator(BUF_SIZE);

    allocator.allocate(100).unwrap();
    let p = allocator.allocate(16).unwrap();
    assert_eq!(p.offset(), D + TAG_SIZE);
    assert_eq!(width_of(&allocator, p), BLOCK_MIN_SIZE);
    assert_eq!(
        allocator.free_blocks().collect::<Vec<_>>(),
        vec![free_block(D + 32, 88)]
    );

    allocator.free(p);
    allocator.check().unwrap();
    assert_eq!(allocator.allocate(16).unwrap(), p);
    allocator.check().unwrap();
}

#[test]
fn test_5() {
    let mut allocator = allocator(BUF_SIZE);

    let p = allocator.allocate(100).unwrap();
    let q = allocator.allocate(100).unwrap();
    // `q` took the spare block right before `p`.
    assert_eq!(q.offset(), D + TAG_SIZE);
    let (wp, wq) = (width_of(&allocator, p), width_of(&allocator, q));

    allocator.free(q);
    allocator.check().unwrap();
    allocator.free(p);
    allocator.check().unwrap();

    assert_eq!(
        allocator.free_blocks().collect::<Vec<_>>(),
        vec![free_block(D, wp + wq)]
    );
    assert_eq!(allocator.blocks().count(), 2);
}

#[test]
fn test_6() {
    let mut allocator = allocator(BUF_SIZE);

    let a = allocator.allocate(100).unwrap();
    let x = allocator.allocate(16).unwrap();
    let y = allocator.allocate(16).unwrap();
    let z = allocator.allocate(16).unwrap();
    assert_eq!(x.offset(), D + TAG_SIZE);
    assert_eq!(y.offset(), D + 32 + TAG_SIZE);
    assert_eq!(z.offset(), D + 64 + TAG_SIZE);
    // The 24 bytes left after `z` are too few for a block of their own.
    assert_eq!(width_of(&allocator, z), 56);
    assert_eq!(a.offset(), D + 120 + TAG_SIZE);
    assert_eq!(allocator.free_blocks().count(), 0);

    allocator.free(x);
    allocator.free(z);
    allocator.check().unwrap();
    assert_eq!(allocator.free_blocks().count(), 2);

    // Merges in both directions.
    allocator.free(y);
    allocator.check().unwrap();
    assert_eq!(
        allocator.free_blocks().collect::<Vec<_>>(),
        vec![free_block(D, 32 + 32 + 56)]
    );
}

#[test]
fn test_7() {
    let mut allocator = allocator(BUF_SIZE);

    let p = allocator.allocate(64).unwrap();
    let pattern: Vec<u8> = (0..64).map(|i| i as u8 ^ 0x5a).collect();
    allocator.payload_mut(p)[..64].copy_from_slice(&pattern);

    let r = allocator.resize(p, 256).unwrap();
    assert_ne!(r, p);
    assert!(allocator.usable_size(r) >= 256);
    assert_eq!(&allocator.payload(r)[..64], &pattern[..]);
    allocator.check().unwrap();
    // The old block merged with the spare blocks on both of its sides.
    assert_eq!(
        allocator.free_blocks().collect::<Vec<_>>(),
        vec![free_block(D, 80 + 80 + 272)]
    );
}

#[test]
fn test_8() {
    let mut allocator = allocator(BUF_SIZE);

    let p = allocator.allocate(256).unwrap();
    let pattern: Vec<u8> = (0..256).map(|i| (i * 7) as u8).collect();
    allocator.payload_mut(p)[..256].copy_from_slice(&pattern);

    let r = allocator.resize(p, 16).unwrap();
    assert_eq!(&allocator.payload(r)[..16], &pattern[..16]);
    allocator.check().unwrap();
}

#[test]
fn test_9() {
    init_logging();
    let mut allocator = allocator(1024);

    let p = allocator.allocate(100).unwrap();
    assert_eq!(allocator.heap_size(), D + 240);
    let pattern: Vec<u8> = (0..100).map(|i| 100 - i as u8).collect();
    allocator.payload_mut(p)[..100].copy_from_slice(&pattern);

    // A failed resize leaves the original allocation alone.
    assert_eq!(
        allocator.resize(p, 1000),
        Err(AllocError::OutOfMemory(GrowError::Exhausted {
            requested: 1016,
            available: 1024 - (D + 240)
        }))
    );
    assert_eq!(&allocator.payload(p)[..100], &pattern[..]);
    assert_eq!(width_of(&allocator, p), 120);
    allocator.check().unwrap();

    allocator.free(p);
    allocator.check().unwrap();
}

#[test]
fn test_10() {
    let mut allocator = allocator(1024);

    allocator.allocate(100).unwrap();
    // The spare block fits, the block to return doesn't.
    assert!(allocator.allocate(200).is_err());
    assert_eq!(allocator.heap_size(), D + 240 + 216);
    allocator.check().unwrap();
    assert!(allocator
        .free_blocks()
        .any(|b| b == free_block(D + 240, 216)));

    let p = allocator.allocate(150).unwrap();
    assert_eq!(p.offset(), D + 240 + TAG_SIZE);
    allocator.check().unwrap();
}

#[test]
fn test_11() {
    let mut allocator = allocator(BUF_SIZE);

    allocator.allocate(100).unwrap();
    // 120 - 96 leaves a remainder below the minimum block size.
    let p = allocator.allocate(80).unwrap();
    assert_eq!(p.offset(), D + TAG_SIZE);
    assert_eq!(allocator.usable_size(p), 104);
    assert_eq!(allocator.free_blocks().count(), 0);
    allocator.check().unwrap();
}

#[test]
fn test_12() {
    let mut allocator = allocator(BUF_SIZE);

    let p = allocator.allocate(100).unwrap();
    allocator.free(p);
    assert_eq!(
        allocator.free_blocks().collect::<Vec<_>>(),
        vec![free_block(D, 240)]
    );

    // The free last block gets extended instead of appending new blocks.
    let q = allocator.allocate(400).unwrap();
    assert_eq!(q.offset(), D + TAG_SIZE);
    assert_eq!(allocator.heap_size(), D + 416);
    assert_eq!(allocator.usable_size(q), 400);
    assert_eq!(allocator.free_blocks().count(), 0);
    allocator.check().unwrap();
}

#[test]
fn test_13() {
    let mut allocator = allocator(BUF_SIZE);

    let p = allocator.allocate(0).unwrap();
    assert_eq!(width_of(&allocator, p), BLOCK_MIN_SIZE);
    assert_eq!(allocator.usable_size(p), BLOCK_MIN_SIZE - BLOCK_OVERHEAD);
    let q = allocator.allocate(0).unwrap();
    assert_ne!(p, q);
    allocator.check().unwrap();
}

#[test]
fn test_14() {
    let mut allocator = allocator(BUF_SIZE);

    assert_eq!(
        allocator.allocate(usize::MAX),
        Err(AllocError::OutOfMemory(GrowError::Overflow {
            requested: usize::MAX
        }))
    );
    assert!(allocator.allocate(isize::MAX as usize).is_err());
    assert!(allocator.allocate(BUF_SIZE).is_err());
    assert_eq!(allocator.heap_size(), DIRECTORY_WIDTH);
    allocator.check().unwrap();
}

#[test]
fn test_15() {
    for size in [0, 1, 16, 17, 100, 1000, 5000] {
        let mut allocator = allocator(BUF_SIZE);

        let _guard = allocator.allocate(size).unwrap();
        let p = allocator.allocate(size).unwrap();
        allocator.free(p);
        assert_eq!(allocator.allocate(size).unwrap(), p, "size {size}");
        allocator.check().unwrap();
    }
}

#[test]
fn test_16() {
    let mut allocator = allocator(BUF_SIZE);

    let p1 = allocator.allocate(224).unwrap();
    let p2 = allocator.allocate(224).unwrap();
    let q1 = allocator.allocate(120).unwrap();
    let q2 = allocator.allocate(120).unwrap();
    assert_eq!(p2.offset(), D + TAG_SIZE);
    assert_eq!(p1.offset(), D + 240 + TAG_SIZE);
    assert_eq!(q2.offset(), D + 480 + TAG_SIZE);
    assert_eq!(q1.offset(), D + 616 + TAG_SIZE);

    allocator.free(q2);
    allocator.free(p2);
    allocator.check().unwrap();

    // First fit: the wider block heads the list and wins over the exact fit.
    let r = allocator.allocate(120).unwrap();
    assert_eq!(r, p2);
    assert_eq!(width_of(&allocator, r), 136);
    assert!(allocator
        .free_blocks()
        .any(|b| b == free_block(q2.block(), 136)));
    assert!(allocator
        .free_blocks()
        .any(|b| b == free_block(D + 136, 104)));
    allocator.check().unwrap();
}

#[test]
fn test_17() {
    let mut allocator = allocator(BUF_SIZE);

    let mut payloads = vec![];
    for size in [8, 24, 40, 100, 300, 1000, 64, 2] {
        payloads.push(allocator.allocate(size).unwrap());
    }
    for p in payloads.iter().step_by(2) {
        allocator.free(*p);
        allocator.check().unwrap();
    }

    // The blocks tile the heap exactly.
    let total: usize = allocator.blocks().map(|b| b.width).sum();
    assert_eq!(total, allocator.heap_size());
    assert!(allocator
        .blocks()
        .zip(allocator.blocks().skip(1))
        .all(|(a, b)| a.offset + a.width == b.offset));
}

#[test]
fn test_18() {
    let mut allocator = allocator(BUF_SIZE);

    let p = allocator.allocate(100).unwrap();
    let q = allocator.allocate(100).unwrap();

    // Footer disagreeing with header.
    let heap = allocator.grower.heap_mut();
    write_word(heap, p.block() + 120 - TAG_SIZE, Tag::new(128, State::Allocated).raw());
    assert_eq!(
        allocator.check(),
        Err(HeapError::TagMismatch {
            offset: p.block(),
            header: Tag::new(120, State::Allocated),
            footer: Tag::new(128, State::Allocated)
        })
    );
    write_tags(allocator.grower.heap_mut(), p.block(), Tag::new(120, State::Allocated));
    allocator.check().unwrap();

    // A block marked free behind the allocator's back is in no list.
    write_tags(allocator.grower.heap_mut(), p.block(), Tag::new(120, State::Free));
    assert_eq!(
        allocator.check(),
        Err(HeapError::Unlisted { offset: p.block() })
    );

    // Two free neighbours.
    write_tags(allocator.grower.heap_mut(), q.block(), Tag::new(120, State::Free));
    assert_eq!(
        allocator.check(),
        Err(HeapError::AdjacentFree {
            first: q.block(),
            second: p.block()
        })
    );
}

#[test]
fn test_19() {
    let mut allocator = allocator(BUF_SIZE);

    allocator.allocate(100).unwrap();
    // The spare block is listed under the wrong class.
    let heap = allocator.grower.heap_mut();
    freelist::remove(heap, D);
    directory::list(4).push_front(heap, D);
    assert_eq!(
        allocator.check(),
        Err(HeapError::WrongClass {
            offset: D,
            width: 120,
            class: 4
        })
    );

    let heap = allocator.grower.heap_mut();
    freelist::remove(heap, D);
    directory::list(1).push_front(heap, D);
    allocator.check().unwrap();

    // A damaged directory tag.
    write_word(allocator.grower.heap_mut(), 0, 0);
    assert!(matches!(allocator.check(), Err(HeapError::Directory(_))));
}
