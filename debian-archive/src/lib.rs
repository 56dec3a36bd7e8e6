// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian archive maintenance.

This crate implements the bookkeeping a Debian archive performs between accepting an
upload and publishing it: keeping *overrides* consistent and triaging uploads that sit
in the *NEW* queue because they introduce packages the archive has never classified.

The canonical home of this crate is <https://github.com/indygreg/PyOxidizer>. Please file issues
and pull requests there.

# Overrides

An override assigns a priority, a section and a maintainer to a package name in a
(suite, component, type) partition, where the type is one of `deb`, `udeb` or `dsc`.
Suites may share an override namespace through a common *override codename*.

Over time overrides drift away from reality. Packages disappear, source packages gain
binary overrides without a source override of their own, and suites derived from others
accumulate stale classifications. The [reconcile] module repairs this. A
[reconcile::Reconciler] removes overrides of packages gone from every suite sharing the
namespace, synthesizes source overrides from binary overrides, copies and syncs
overrides from an origin suite and reports packages left without an override. All
changes of one partition commit as a single transaction and are recorded in the
[audit] log. A dry run performs identical detection and reporting without writing.

Packages with files in the holding area of accepted uploads are never removed, as the
catalog may not know about them yet. See [reference::Blacklist].

# NEW queue triage

The [triage] module drives uploads waiting in a policy queue through an operator
dialog. For each upload the packages lacking overrides are computed and presented with
their proposed classification. The operator may edit classifications, inspect the
upload's files, annotate it with notes, prod its maintainer, reject it or accept it.

The decision logic lives in [triage::machine] as a pure transition function. Effects
(catalog writes, editors, mail, file moves) are performed by [triage::session] through
traits defined in [external] and [triage::session::Operator], so alternative front ends
and deterministic tests can substitute their own implementations.

# Storage and locking

The archive catalog is a SQLite database. [catalog::Catalog] owns the connection and
[catalog::CatalogTransaction] scopes writes. Read queries are provided by the
[catalog::CatalogQueries] trait, available on both.

Concurrent runs are serialized by the [lock] module: a daily processing lock guards
operations that must not race acceptance, and per-package locks keep two operators
from triaging the same upload.

# Configuration

Archives are described by a YAML document deserialized into [config::ArchiveConfig].
[catalog::CatalogTransaction::import_config] seeds a catalog with the reference data
it declares.
*/

pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod external;
pub mod lock;
pub mod reconcile;
pub mod reference;
#[cfg(test)]
mod testing;
pub mod triage;
pub mod upload;
