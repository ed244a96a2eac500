//! Property-based tests for the usage summary invariant.
//!
//! Every category summary must satisfy `reclaimable <= size` for arbitrary
//! inventories, under both image reclaim policies.

use proptest::prelude::*;

use super::usage::{
    ImageReclaimPolicy, build_cache_summary, containers_summary, images_summary, summarize,
    volumes_summary,
};
use crate::engine::{
    BuildCacheRecord, Category, ContainerRecord, ImageRecord, Inventory, VolumeRecord,
};
use crate::platform::fs::SystemDiskUsage;

// ──────────────────── strategies ────────────────────

const MAX_OBJECT: u64 = 1 << 40;

fn arb_build_cache() -> impl Strategy<Value = BuildCacheRecord> {
    (0..MAX_OBJECT, any::<bool>(), any::<bool>()).prop_map(|(size, in_use, shared)| {
        BuildCacheRecord {
            size,
            in_use,
            shared,
        }
    })
}

fn arb_state() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("running".to_string()),
        Just("Up 2 hours (Paused)".to_string()),
        Just("Restarting (1) 5 seconds ago".to_string()),
        Just("Exited (0) 2 hours ago".to_string()),
        Just("created".to_string()),
        Just("dead".to_string()),
        "[a-zA-Z ()0-9]{0,24}",
    ]
}

fn arb_container() -> impl Strategy<Value = ContainerRecord> {
    (0..MAX_OBJECT, arb_state()).prop_map(|(size_rw, state)| ContainerRecord { size_rw, state })
}

fn arb_volume() -> impl Strategy<Value = VolumeRecord> {
    (proptest::option::of(0..MAX_OBJECT), 0_u64..4)
        .prop_map(|(size, ref_count)| VolumeRecord { size, ref_count })
}

fn arb_image() -> impl Strategy<Value = ImageRecord> {
    (
        proptest::option::of(0_u64..3),
        proptest::option::of(0..MAX_OBJECT),
        proptest::option::of(0..MAX_OBJECT),
    )
        .prop_map(|(containers, virtual_size, shared_size)| ImageRecord {
            containers,
            virtual_size,
            shared_size,
        })
}

fn arb_policy() -> impl Strategy<Value = ImageReclaimPolicy> {
    prop_oneof![
        Just(ImageReclaimPolicy::Attached),
        Just(ImageReclaimPolicy::Unattached),
    ]
}

fn arb_inventory() -> impl Strategy<Value = Inventory> {
    (
        0..MAX_OBJECT * 8,
        proptest::collection::vec(arb_build_cache(), 0..16),
        proptest::collection::vec(arb_container(), 0..16),
        proptest::collection::vec(arb_volume(), 0..16),
        proptest::collection::vec(arb_image(), 0..16),
    )
        .prop_map(
            |(layers_size, build_cache, containers, volumes, images)| Inventory {
                layers_size,
                build_cache,
                containers,
                volumes,
                images,
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every category of every snapshot keeps `reclaimable <= size`.
    #[test]
    fn reclaimable_never_exceeds_size(inventory in arb_inventory(), policy in arb_policy()) {
        let usage = summarize(SystemDiskUsage::default(), &inventory, policy);
        for category in Category::ALL {
            let summary = usage.summary(category);
            prop_assert!(
                summary.reclaimable <= summary.size,
                "{category}: reclaimable {} > size {}",
                summary.reclaimable,
                summary.size
            );
        }
    }

    /// Shared build-cache entries never change either total.
    #[test]
    fn shared_build_cache_never_counts(
        owned in proptest::collection::vec(arb_build_cache(), 0..16),
        shared in proptest::collection::vec(arb_build_cache(), 0..16),
    ) {
        let owned: Vec<_> = owned
            .into_iter()
            .map(|entry| BuildCacheRecord { shared: false, ..entry })
            .collect();
        let mut mixed = owned.clone();
        mixed.extend(shared.into_iter().map(|entry| BuildCacheRecord { shared: true, ..entry }));
        prop_assert_eq!(build_cache_summary(&mixed), build_cache_summary(&owned));
    }

    /// Unknown-size volumes never change either total.
    #[test]
    fn unknown_volume_never_counts(
        volumes in proptest::collection::vec(arb_volume(), 0..16),
        ref_count in 0_u64..4,
    ) {
        let mut with_unknown = volumes.clone();
        with_unknown.push(VolumeRecord { size: None, ref_count });
        prop_assert_eq!(volumes_summary(&with_unknown), volumes_summary(&volumes));
    }

    /// The two image policies partition the images with known sizes.
    #[test]
    fn image_policies_partition_estimate(images in proptest::collection::vec(arb_image(), 0..16)) {
        let attached = images_summary(u64::MAX, &images, ImageReclaimPolicy::Attached);
        let unattached = images_summary(u64::MAX, &images, ImageReclaimPolicy::Unattached);
        let total: u64 = images
            .iter()
            .filter_map(|image| Some(image.virtual_size?.saturating_sub(image.shared_size?)))
            .sum();
        prop_assert_eq!(attached.reclaimable + unattached.reclaimable, total);
    }

    /// Container reclaimable plus active bytes equals the total.
    #[test]
    fn containers_split_by_activity(containers in proptest::collection::vec(arb_container(), 0..16)) {
        let summary = containers_summary(&containers);
        let total: u64 = containers.iter().map(|c| c.size_rw).sum();
        prop_assert_eq!(summary.size, total);
        prop_assert!(summary.reclaimable <= summary.size);
    }
}
