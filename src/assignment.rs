//! Stable per-user voice assignment.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cache::VoiceCache;
use crate::TtsError;

/// The voice and speaker a user speaks with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpeakerAssignment {
    pub voice_name: String,
    pub speaker_index: u32,
}

enum Lookup {
    Resolved(SpeakerAssignment),
    /// Voice picked, speaker not yet known.
    Pending(String),
}

#[derive(Debug, Clone)]
struct AssignmentRecord {
    voice_name: String,
    /// `None` until the voice is loaded and its speaker count known.
    speaker_index: Option<u32>,
}

/// Process-wide table of user assignments.
///
/// A user's first message picks a voice uniformly from the catalog, then a
/// speaker uniformly from that voice's speakers. Both picks are made at most
/// once per user and never change until [`UserVoiceAssignment::clear`].
pub struct UserVoiceAssignment {
    records: Mutex<HashMap<String, AssignmentRecord>>,
    rng: Mutex<StdRng>,
}

impl Default for UserVoiceAssignment {
    fn default() -> Self {
        Self::new()
    }
}

impl UserVoiceAssignment {
    /// An empty table seeded from OS entropy.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// An empty table with deterministic picks.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Resolve the voice and speaker for `user`, assigning them on first contact.
    ///
    /// The voice is chosen from `cache`'s catalog and loaded through `cache`
    /// to learn its speaker count. If loading fails the voice choice is kept
    /// and the speaker pick is retried on the user's next message. If the
    /// user is cleared or moved to another voice while loading, resolution
    /// starts over.
    pub fn resolve(&self, user: &str, cache: &VoiceCache) -> Result<SpeakerAssignment, TtsError> {
        loop {
            let voice_name = match self.lookup_or_pick(user, cache)? {
                Lookup::Resolved(assignment) => return Ok(assignment),
                Lookup::Pending(voice_name) => voice_name,
            };

            // Loading can take seconds; the table is not locked meanwhile.
            let voice = cache.get(&voice_name)?;

            if let Some(assignment) = self.fill_speaker(user, &voice_name, voice.speaker_count()) {
                return Ok(assignment);
            }
            log::debug!("Assignment of '{user}' changed while loading '{voice_name}', retrying");
        }
    }

    fn lookup_or_pick(&self, user: &str, cache: &VoiceCache) -> Result<Lookup, TtsError> {
        let mut records = self.lock_records();
        if let Some(record) = records.get(user) {
            return Ok(match record.speaker_index {
                Some(speaker_index) => Lookup::Resolved(SpeakerAssignment {
                    voice_name: record.voice_name.clone(),
                    speaker_index,
                }),
                None => Lookup::Pending(record.voice_name.clone()),
            });
        }

        let names = cache.catalog().names();
        if names.is_empty() {
            return Err(TtsError::NoVoicesAvailable);
        }
        let pick = self.random_below(names.len() as u32) as usize;
        let voice_name = names[pick].to_string();
        log::debug!("Assigned voice '{voice_name}' to user '{user}'");
        records.insert(
            user.to_string(),
            AssignmentRecord {
                voice_name: voice_name.clone(),
                speaker_index: None,
            },
        );
        Ok(Lookup::Pending(voice_name))
    }

    /// Pick the speaker of `user` from `voice_name`'s speakers, unless the
    /// user was cleared or moved to another voice in the meantime.
    fn fill_speaker(
        &self,
        user: &str,
        voice_name: &str,
        speaker_count: u32,
    ) -> Option<SpeakerAssignment> {
        let mut records = self.lock_records();
        let record = records
            .get_mut(user)
            .filter(|record| record.voice_name == voice_name)?;
        let speaker_index = match record.speaker_index {
            Some(index) => index,
            None => {
                let index = match speaker_count {
                    0 | 1 => 0,
                    count => self.random_below(count),
                };
                log::debug!("Assigned speaker {index} of '{voice_name}' to user '{user}'");
                record.speaker_index = Some(index);
                index
            }
        };
        Some(SpeakerAssignment {
            voice_name: voice_name.to_string(),
            speaker_index,
        })
    }

    /// The fully resolved assignment of `user`, if any.
    pub fn get(&self, user: &str) -> Option<SpeakerAssignment> {
        let records = self.lock_records();
        let record = records.get(user)?;
        Some(SpeakerAssignment {
            voice_name: record.voice_name.clone(),
            speaker_index: record.speaker_index?,
        })
    }

    /// The voice picked for `user`, even if the speaker is not yet known.
    pub fn assigned_voice(&self, user: &str) -> Option<String> {
        self.lock_records()
            .get(user)
            .map(|record| record.voice_name.clone())
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    /// Forget every assignment.
    pub fn clear(&self) {
        self.lock_records().clear();
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<String, AssignmentRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn random_below(&self, upper: u32) -> u32 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..upper)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::cache::tests::CountingLoader;
    use crate::catalog::{VoiceCatalog, VoiceDescriptor};
    use crate::engines::testing::EchoStub;
    use crate::engines::Batch;
    use crate::SynthesisEngine;

    fn cache_with(voices: Vec<VoiceDescriptor>) -> VoiceCache {
        VoiceCache::new(
            Arc::new(VoiceCatalog::from_descriptors(voices)),
            Arc::new(CountingLoader::default()),
        )
    }

    fn alice_and_bob() -> VoiceCache {
        cache_with(vec![
            VoiceDescriptor::stub("alice", 3),
            VoiceDescriptor::stub("bob", 1),
        ])
    }

    #[test]
    fn repeated_resolve_is_stable() {
        let cache = alice_and_bob();
        let assignments = UserVoiceAssignment::new();

        let first = assignments.resolve("u1", &cache).unwrap();
        let second = assignments.resolve("u1", &cache).unwrap();
        assert_eq!(first, second);
        assert_eq!(assignments.get("u1"), Some(first));
    }

    #[test]
    fn two_messages_from_one_user_share_voice_and_speaker() {
        let cache = alice_and_bob();
        let assignments = UserVoiceAssignment::with_seed(7);

        for user in (0..50).map(|i| format!("user{i}")) {
            let first = assignments.resolve(&user, &cache).unwrap();
            let second = assignments.resolve(&user, &cache).unwrap();
            assert_eq!(first, second);
            match first.voice_name.as_str() {
                "alice" => assert!(first.speaker_index < 3),
                "bob" => assert_eq!(first.speaker_index, 0),
                other => panic!("unexpected voice {other}"),
            }
        }
    }

    #[test]
    fn empty_catalog_has_no_voices() {
        let cache = cache_with(Vec::new());
        let assignments = UserVoiceAssignment::new();

        let err = assignments.resolve("u1", &cache).unwrap_err();
        assert!(matches!(err, TtsError::NoVoicesAvailable));
        assert!(assignments.is_empty());
    }

    #[test]
    fn voices_are_assigned_roughly_uniformly() {
        let names = ["a", "b", "c", "d"];
        let cache = cache_with(names.iter().map(|n| VoiceDescriptor::stub(n, 1)).collect());
        let assignments = UserVoiceAssignment::with_seed(42);

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for i in 0..4000 {
            let assigned = assignments.resolve(&format!("user{i}"), &cache).unwrap();
            *counts.entry(assigned.voice_name).or_default() += 1;
        }

        assert_eq!(counts.len(), names.len());
        for (name, count) in counts {
            assert!((800..=1200).contains(&count), "{name} assigned {count} times");
        }
    }

    #[test]
    fn multi_speaker_voices_use_every_speaker() {
        let cache = cache_with(vec![VoiceDescriptor::stub("alice", 3)]);
        let assignments = UserVoiceAssignment::with_seed(1);

        let speakers: HashSet<u32> = (0..300)
            .map(|i| {
                assignments
                    .resolve(&format!("user{i}"), &cache)
                    .unwrap()
                    .speaker_index
            })
            .collect();
        assert_eq!(speakers, HashSet::from([0, 1, 2]));
    }

    #[test]
    fn same_seed_same_assignments() {
        let cache = alice_and_bob();
        let left = UserVoiceAssignment::with_seed(99);
        let right = UserVoiceAssignment::with_seed(99);

        for user in ["x", "y", "z", "w"] {
            assert_eq!(
                left.resolve(user, &cache).unwrap(),
                right.resolve(user, &cache).unwrap()
            );
        }
    }

    #[test]
    fn concurrent_first_messages_get_one_assignment() {
        let cache = Arc::new(alice_and_bob());
        let assignments = Arc::new(UserVoiceAssignment::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let assignments = Arc::clone(&assignments);
                std::thread::spawn(move || assignments.resolve("racer", &cache).unwrap())
            })
            .collect();
        let results: Vec<SpeakerAssignment> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.iter().all(|r| r == &results[0]));
        assert_eq!(assignments.len(), 1);
    }

    #[test]
    fn failed_load_keeps_voice_choice() {
        let loader = Arc::new(CountingLoader {
            fail: true,
            ..Default::default()
        });
        let cache = VoiceCache::new(
            Arc::new(VoiceCatalog::from_descriptors([
                VoiceDescriptor::stub("alice", 3),
                VoiceDescriptor::stub("bob", 1),
            ])),
            loader.clone(),
        );
        let assignments = UserVoiceAssignment::new();

        assert!(matches!(
            assignments.resolve("u1", &cache),
            Err(TtsError::VoiceLoad { .. })
        ));
        let voice = assignments.assigned_voice("u1").unwrap();
        assert_eq!(assignments.get("u1"), None);

        assert!(assignments.resolve("u1", &cache).is_err());
        assert_eq!(assignments.assigned_voice("u1"), Some(voice));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    /// Alice and bob, running `hook` in the middle of the first voice load.
    fn cache_with_load_hook(hook: impl Fn(&VoiceDescriptor) + Send + Sync + 'static) -> VoiceCache {
        let fired = AtomicBool::new(false);
        let loader = move |voice: &VoiceDescriptor| -> Result<Box<dyn SynthesisEngine>, TtsError> {
            if !fired.swap(true, Ordering::SeqCst) {
                hook(voice);
            }
            Ok(Box::new(Batch(EchoStub {
                sample_rate: voice.sample_rate,
                speakers: voice.speaker_count,
            })))
        };
        VoiceCache::new(
            Arc::new(VoiceCatalog::from_descriptors([
                VoiceDescriptor::stub("alice", 3),
                VoiceDescriptor::stub("bob", 1),
            ])),
            Arc::new(loader),
        )
    }

    #[test]
    fn user_moved_during_load_gets_speaker_of_new_voice() {
        let assignments = Arc::new(UserVoiceAssignment::new());
        let first_loaded = Arc::new(Mutex::new(None));

        let table = Arc::clone(&assignments);
        let seen = Arc::clone(&first_loaded);
        let cache = cache_with_load_hook(move |loading| {
            *seen.lock().unwrap() = Some(loading.name.clone());
            // Meanwhile the user is reset and re-assigned to the other
            // voice, whose load fails before a speaker is picked.
            let other = if loading.name == "alice" {
                VoiceDescriptor::stub("bob", 1)
            } else {
                VoiceDescriptor::stub("alice", 3)
            };
            let failing = VoiceCache::new(
                Arc::new(VoiceCatalog::from_descriptors([other])),
                Arc::new(CountingLoader {
                    fail: true,
                    ..Default::default()
                }),
            );
            table.clear();
            assert!(table.resolve("u1", &failing).is_err());
        });

        let resolved = assignments.resolve("u1", &cache).unwrap();
        let first_loaded = first_loaded.lock().unwrap().clone().unwrap();
        assert_ne!(resolved.voice_name, first_loaded);
        match resolved.voice_name.as_str() {
            "alice" => assert!(resolved.speaker_index < 3),
            _ => assert_eq!(resolved.speaker_index, 0),
        }
        assert_eq!(assignments.get("u1"), Some(resolved));
    }

    #[test]
    fn user_cleared_during_load_is_assigned_afresh() {
        let assignments = Arc::new(UserVoiceAssignment::with_seed(3));
        let table = Arc::clone(&assignments);
        let cache = cache_with_load_hook(move |_| table.clear());

        let resolved = assignments.resolve("u1", &cache).unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments.get("u1"), Some(resolved.clone()));
        assert_eq!(assignments.resolve("u1", &cache).unwrap(), resolved);
    }

    #[test]
    fn clear_forgets_users() {
        let cache = alice_and_bob();
        let assignments = UserVoiceAssignment::new();
        assignments.resolve("u1", &cache).unwrap();

        assignments.clear();
        assert!(assignments.is_empty());
        assert_eq!(assignments.get("u1"), None);
    }
}
