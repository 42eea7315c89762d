use crate::{
    config::{MalformedPolicy, TableLayout},
    error::{MalformedRecord, TableError},
    parse::Record,
};

/// Running statistics for one station, all in tenths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub name: Box<[u8]>,
    pub hash: u32,
    pub count: u64,
    pub sum: i64,
    pub min: i32,
    pub max: i32,
}

impl Station {
    pub fn new(name: &[u8], hash: u32, value: i32) -> Self {
        Self {
            name: name.into(),
            hash,
            count: 1,
            sum: value as i64,
            min: value,
            max: value,
        }
    }

    #[inline]
    pub fn add(&mut self, value: i32) {
        self.count += 1;
        self.sum += value as i64;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn combine(&mut self, other: &Station) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Mean in tenths, rounded half away from zero.
    pub fn mean_tenths(&self) -> i32 {
        (self.sum as f64 / self.count as f64).round() as i32
    }

    pub fn name_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Record and skip counts from feeding records into a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub records: u64,
    pub skipped: u64,
}

impl std::ops::AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.records += rhs.records;
        self.skipped += rhs.skipped;
    }
}

enum Probe {
    Found(usize),
    Vacant(usize),
}

/// Fixed-capacity open-addressed map from name hash to [`Station`].
///
/// A hash lives in the first of `hash & (hash_space - 1) + 0..=collision_slack` that is either
/// empty or already holds it. Nothing is ever removed, so a probe can stop at the first gap.
#[derive(Debug)]
pub struct StationTable {
    slots: Vec<Option<Station>>,
    mask: usize,
    slack: usize,
    len: usize,
}

impl StationTable {
    pub fn new(layout: TableLayout) -> Self {
        debug_assert!(layout.hash_space.is_power_of_two());
        Self {
            slots: vec![None; layout.slots()],
            mask: layout.hash_space - 1,
            slack: layout.collision_slack,
            len: 0,
        }
    }

    fn probe(&self, hash: u32, name: &[u8]) -> Result<Probe, TableError> {
        let home = hash as usize & self.mask;
        for index in home..=home + self.slack {
            match &self.slots[index] {
                None => return Ok(Probe::Vacant(index)),
                Some(station) if station.hash == hash => {
                    if *station.name != *name {
                        return Err(TableError::HashConflict {
                            hash,
                            existing: station.name_lossy().into_owned(),
                            incoming: String::from_utf8_lossy(name).into_owned(),
                        });
                    }
                    return Ok(Probe::Found(index));
                }
                Some(_) => {}
            }
        }
        Err(TableError::CapacityExceeded {
            hash,
            probe_limit: self.slack + 1,
        })
    }

    /// Adds one observation, copying `name` only if the station is new.
    #[inline]
    pub fn upsert(&mut self, hash: u32, name: &[u8], value: i32) -> Result<(), TableError> {
        match self.probe(hash, name)? {
            Probe::Found(index) => {
                if let Some(station) = &mut self.slots[index] {
                    station.add(value);
                }
            }
            Probe::Vacant(index) => {
                self.slots[index] = Some(Station::new(name, hash, value));
                self.len += 1;
            }
        }
        Ok(())
    }

    /// Folds a finished station in, taking ownership of it if its hash is new here.
    pub fn merge(&mut self, incoming: Station) -> Result<(), TableError> {
        match self.probe(incoming.hash, &incoming.name)? {
            Probe::Found(index) => {
                if let Some(station) = &mut self.slots[index] {
                    station.combine(&incoming);
                }
            }
            Probe::Vacant(index) => {
                self.slots[index] = Some(incoming);
                self.len += 1;
            }
        }
        Ok(())
    }

    pub fn merge_table(&mut self, other: StationTable) -> Result<(), TableError> {
        other.into_stations().try_for_each(|station| self.merge(station))
    }

    /// Feeds parsed records in through [`StationTable::upsert`].
    ///
    /// Malformed records abort under [`MalformedPolicy::Fail`] and are counted under
    /// [`MalformedPolicy::Skip`]. Table errors always abort.
    pub fn absorb<'a>(
        &mut self,
        records: impl Iterator<Item = Result<Record<'a>, MalformedRecord>>,
        policy: MalformedPolicy,
    ) -> anyhow::Result<Tally> {
        let mut tally = Tally::default();
        for record in records {
            match record {
                Ok(Record { name, hash, value }) => {
                    self.upsert(hash, name, value)?;
                    tally.records += 1;
                }
                Err(malformed) => match policy {
                    MalformedPolicy::Fail => return Err(malformed.into()),
                    MalformedPolicy::Skip => {
                        tracing::trace!(%malformed, "skipping record");
                        tally.skipped += 1;
                    }
                },
            }
        }
        Ok(tally)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn total_count(&self) -> u64 {
        self.stations().map(|s| s.count).sum()
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.slots.iter().flatten()
    }

    pub fn get(&self, name: &[u8]) -> Option<&Station> {
        let hash = crate::parse::name_hash(name);
        match self.probe(hash, name) {
            Ok(Probe::Found(index)) => self.slots[index].as_ref(),
            _ => None,
        }
    }

    pub fn into_stations(self) -> impl Iterator<Item = Station> {
        self.slots.into_iter().flatten()
    }

    /// Stations ordered byte-lexicographically by name.
    pub fn into_sorted(self) -> Vec<Station> {
        let mut stations: Vec<_> = self.into_stations().collect();
        stations.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        stations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{name_hash, records};

    fn tiny() -> TableLayout {
        TableLayout {
            hash_space: 4,
            collision_slack: 1,
        }
    }

    fn upsert(table: &mut StationTable, name: &str, value: i32) -> Result<(), TableError> {
        table.upsert(name_hash(name.as_bytes()), name.as_bytes(), value)
    }

    #[test]
    fn upsert_tracks_statistics() {
        let mut table = StationTable::new(TableLayout::default());
        for v in [123, 157, -40] {
            upsert(&mut table, "Paris", v).unwrap();
        }
        let paris = table.get(b"Paris").unwrap();
        assert_eq!((paris.count, paris.sum, paris.min, paris.max), (3, 240, -40, 157));
        assert_eq!(table.len(), 1);
        assert!(table.get(b"London").is_none());
    }

    #[test]
    fn colliding_home_slots_probe_forward() {
        let mut table = StationTable::new(tiny());
        // Both land on home slot 1 of 4.
        table.upsert(1, b"a", 10).unwrap();
        table.upsert(5, b"b", 20).unwrap();
        table.upsert(5, b"b", 30).unwrap();
        assert_eq!(table.len(), 2);
        let b: Vec<_> = table.stations().filter(|s| s.hash == 5).collect();
        assert_eq!((b[0].count, b[0].sum), (2, 50));
    }

    #[test]
    fn exhausted_probe_is_capacity_error() {
        let mut table = StationTable::new(tiny());
        table.upsert(1, b"a", 0).unwrap();
        table.upsert(5, b"b", 0).unwrap();
        let err = table.upsert(9, b"c", 0).unwrap_err();
        assert_eq!(
            err,
            TableError::CapacityExceeded {
                hash: 9,
                probe_limit: 2
            }
        );
    }

    #[test]
    fn last_home_slot_spills_into_slack() {
        let mut table = StationTable::new(tiny());
        table.upsert(3, b"a", 0).unwrap();
        table.upsert(7, b"b", 0).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn same_hash_different_name_is_a_conflict() {
        let mut table = StationTable::new(tiny());
        table.upsert(2, b"first", 0).unwrap();
        let err = table.upsert(2, b"second", 0).unwrap_err();
        assert!(matches!(err, TableError::HashConflict { hash: 2, .. }));
    }

    #[test]
    fn merge_is_commutative() {
        let mut a = Station::new(b"Oslo", name_hash(b"Oslo"), -52);
        a.add(31);
        let mut b = Station::new(b"Oslo", name_hash(b"Oslo"), 88);
        b.add(-120);
        b.add(7);

        let mut ab = StationTable::new(TableLayout::default());
        ab.merge(a.clone()).unwrap();
        ab.merge(b.clone()).unwrap();
        let mut ba = StationTable::new(TableLayout::default());
        ba.merge(b).unwrap();
        ba.merge(a).unwrap();

        let ab = ab.get(b"Oslo").unwrap();
        let ba = ba.get(b"Oslo").unwrap();
        assert_eq!(ab, ba);
        assert_eq!((ab.count, ab.sum, ab.min, ab.max), (5, -46, -120, 88));
    }

    #[test]
    fn merge_table_moves_new_stations() {
        let mut total = StationTable::new(TableLayout::default());
        upsert(&mut total, "Paris", 10).unwrap();
        let mut block = StationTable::new(TableLayout::default());
        upsert(&mut block, "Paris", 30).unwrap();
        upsert(&mut block, "London", 91).unwrap();

        total.merge_table(block).unwrap();
        assert_eq!(total.len(), 2);
        assert_eq!(total.total_count(), 3);
        let names: Vec<_> = total.into_sorted().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec![Box::from(&b"London"[..]), Box::from(&b"Paris"[..])]);
    }

    #[test]
    fn absorb_honours_malformed_policy() {
        let input = b"Paris;12.3\nbroken\nParis;1.0\n";

        let mut table = StationTable::new(TableLayout::default());
        let tally = table.absorb(records(input), MalformedPolicy::Skip).unwrap();
        assert_eq!((tally.records, tally.skipped), (2, 1));
        assert_eq!(table.total_count(), 2);

        let mut table = StationTable::new(TableLayout::default());
        let err = table.absorb(records(input), MalformedPolicy::Fail).unwrap_err();
        assert!(err.downcast_ref::<MalformedRecord>().is_some());
    }
}
