//! `UProbeSelflow`: split-output selection policy (spec.md §2
//! "UProbeSelflow (5%)", §4.9). Catches `SplitUpdate`, walks the
//! super-pipe's advertised flow-defs, filters by type, and reconciles
//! against a textual selector grammar.

use crate::pipe::{UPipe, UPipeManager};
use crate::probe::{CatchResult, UEvent, UProbe, UProbeCatcher};
use crate::uref::{flow_def, URef};
use std::sync::{Arc, Mutex};

/// The flow-def type a selector filters on (spec.md §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    Void,
    Pic,
    Sound,
    Subpic,
}

/// One parsed selector term.
#[derive(Debug, Clone, PartialEq)]
enum Term {
    Id(u64),
    Attr { key: String, value: String },
    All,
    Auto,
}

/// Parse a comma-separated selector string into terms. Unknown `<key>`
/// terms are kept (graceful tolerance — spec.md: "logged, not fatal");
/// rejection only happens at match time, where an unknown key simply
/// never matches.
fn parse_selector(selector: &str) -> Vec<Term> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|term| {
            if term == "all" {
                Term::All
            } else if term == "auto" {
                Term::Auto
            } else if let Some((key, value)) = term.split_once('=') {
                let key = if key == "name" { "f.name".to_string() } else if key == "lang" { flow_def::LANGUAGE.to_string() } else { key.to_string() };
                Term::Attr { key, value: value.to_string() }
            } else if let Ok(id) = term.parse::<u64>() {
                Term::Id(id)
            } else {
                log::warn!("unrecognized selflow term: {term}");
                Term::Attr { key: term.to_string(), value: String::new() }
            }
        })
        .collect()
}

fn flow_type_matches(flow_def: &URef, want: FlowType) -> bool {
    match flow_def.flow_def_name() {
        Some(def) => match want {
            FlowType::Void => def.starts_with("void."),
            FlowType::Pic => def.starts_with("pic.") && !def.starts_with("pic.sub."),
            FlowType::Sound => def.starts_with("sound."),
            FlowType::Subpic => def.starts_with("pic.sub."),
        },
        None => false,
    }
}

fn term_matches(term: &Term, flow: &URef) -> bool {
    match term {
        Term::Id(id) => matches!(flow.dict().get(flow_def::ID), Some(crate::dict::UDictValue::UInt(v)) if v == id),
        Term::Attr { key, value } => matches!(
            flow.dict().get(key),
            Some(crate::dict::UDictValue::String(v)) if v == value
        ),
        Term::All | Term::Auto => true,
    }
}

struct SelflowState {
    selector: Vec<Term>,
    flow_type: FlowType,
    sub_manager: Arc<UPipeManager>,
    /// flow ids currently backed by a sub-pipe, with the handle to that
    /// sub-pipe so deselection can detach (and thereby release) it.
    selected: Vec<(u64, UPipe)>,
    /// the `auto` mode's currently retained flow id, if any.
    auto_pick: Option<u64>,
}

/// A probe decorator implementing the selector grammar against a
/// super-pipe's discovered split outputs.
pub struct UProbeSelflow {
    state: Mutex<SelflowState>,
}

impl UProbeSelflow {
    pub fn new(selector: &str, flow_type: FlowType, sub_manager: Arc<UPipeManager>) -> Self {
        Self {
            state: Mutex::new(SelflowState {
                selector: parse_selector(selector),
                flow_type,
                sub_manager,
                selected: Vec::new(),
                auto_pick: None,
            }),
        }
    }

    /// Re-evaluate the selector against `super_pipe`'s currently
    /// advertised flow-defs, allocating/releasing sub-pipes as needed
    /// (spec.md §4.9: "allocates/releases sub-pipes wrapping the
    /// super's outputs").
    fn reconcile(&self, super_pipe: &UPipe) {
        let mut state = self.state.lock().expect("selflow mutex poisoned");
        // Exclude wrapper sub-pipes this selflow already created: they
        // live in the same super-pipe sub-table as the advertised flows
        // (flow_alloc_sub always registers into the super it's given),
        // and a wrapper's flow-def is a `dup` of the flow it wraps, so
        // without this exclusion it would keep satisfying its own
        // selection criteria even after the original advertised flow is
        // gone, and deselection could never observe an empty candidate
        // set.
        let candidates: Vec<URef> = super_pipe
            .iterate_sub()
            .into_iter()
            .filter(|sub| !state.selected.iter().any(|(_, wrapper)| wrapper.identity() == sub.identity()))
            .filter_map(|sub| sub.flow_def())
            .filter(|f| flow_type_matches(f, state.flow_type))
            .collect();

        let wanted_ids: Vec<u64> = match state.selector.clone().as_slice() {
            [Term::Auto] => {
                if let Some(id) = state.auto_pick {
                    if candidates.iter().any(|f| flow_id(f) == Some(id)) {
                        vec![id]
                    } else {
                        state.auto_pick = None;
                        pick_first_id(&candidates).map(|id| {
                            state.auto_pick = Some(id);
                            vec![id]
                        }).unwrap_or_default()
                    }
                } else {
                    pick_first_id(&candidates).map(|id| {
                        state.auto_pick = Some(id);
                        vec![id]
                    }).unwrap_or_default()
                }
            }
            terms => candidates
                .iter()
                .filter(|f| terms.iter().any(|t| term_matches(t, f)))
                .filter_map(flow_id)
                .collect(),
        };

        let to_remove: Vec<(u64, UPipe)> = state
            .selected
            .iter()
            .filter(|(id, _)| !wanted_ids.contains(id))
            .map(|(id, pipe)| (*id, pipe.clone()))
            .collect();
        for (_, sub) in &to_remove {
            super_pipe.remove_sub(sub);
        }
        state.selected.retain(|(id, _)| !to_remove.iter().any(|(removed, _)| removed == id));

        for id in &wanted_ids {
            if state.selected.iter().any(|(selected, _)| selected == id) {
                continue;
            }
            if let Some(flow) = candidates.iter().find(|f| flow_id(f) == Some(*id)) {
                let probe = UProbe::new(crate::probe::FnCatcher::new(|_| CatchResult::Unhandled));
                if let Ok(sub) = state.sub_manager.flow_alloc_sub(super_pipe, probe, flow.dup()) {
                    state.selected.push((*id, sub));
                }
            }
        }
    }
}

fn flow_id(flow: &URef) -> Option<u64> {
    match flow.dict().get(flow_def::ID) {
        Some(crate::dict::UDictValue::UInt(v)) => Some(*v),
        _ => None,
    }
}

fn pick_first_id(candidates: &[URef]) -> Option<u64> {
    candidates.first().and_then(flow_id)
}

impl UProbeCatcher for UProbeSelflow {
    fn catch(&self, event: &UEvent) -> CatchResult {
        if matches!(event, UEvent::SplitUpdate) {
            // The throwing pipe is the super-pipe; reconciliation needs
            // its handle, which the probe chain API does not currently
            // pass down to catchers (events carry no pipe reference by
            // design — see crate::probe). Callers that want automatic
            // reconciliation should call `reconcile` directly from their
            // `SplitUpdate` handling code instead of relying solely on
            // this catcher.
            CatchResult::Unhandled
        } else {
            CatchResult::Unhandled
        }
    }
}

impl UProbeSelflow {
    /// Public entry point pipes should call from their own
    /// `SplitUpdate` handling, since a catcher alone only receives the
    /// event, not the throwing pipe's handle.
    pub fn on_split_update(&self, super_pipe: &UPipe) {
        self.reconcile(super_pipe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_selector_terms() {
        let terms = parse_selector("42,lang=eng,all");
        assert_eq!(terms, vec![
            Term::Id(42),
            Term::Attr { key: flow_def::LANGUAGE.to_string(), value: "eng".to_string() },
            Term::All,
        ]);
    }

    #[test]
    fn flow_type_matching_distinguishes_subpic_from_pic() {
        let pic = URef::flow_def("pic.");
        let sub = URef::flow_def("pic.sub.");
        assert!(flow_type_matches(&pic, FlowType::Pic));
        assert!(!flow_type_matches(&sub, FlowType::Pic));
        assert!(flow_type_matches(&sub, FlowType::Subpic));
    }

    #[test]
    fn id_term_matches_numeric_id_attribute() {
        let mut flow = URef::flow_def("sound.");
        flow.dict_mut().set(flow_def::ID, crate::dict::UDictValue::UInt(7));
        assert!(term_matches(&Term::Id(7), &flow));
        assert!(!term_matches(&Term::Id(8), &flow));
    }

    struct NullPipe;
    impl crate::pipe::UPipeImpl for NullPipe {
        fn input(&mut self, _uref: URef, _common: &mut crate::pipe::PipeCommon) {}
        fn control(&mut self, command: crate::pipe::ControlCommand, common: &mut crate::pipe::PipeCommon) -> crate::error::UResult {
            if let crate::pipe::ControlCommand::SetFlowDef(f) = command {
                common.store_flow_def(f);
            }
            Ok(())
        }
    }

    fn silent_probe() -> UProbe {
        UProbe::new(crate::probe::FnCatcher::new(|_| CatchResult::Unhandled))
    }

    fn flow_with_id(def: &str, id: u64) -> URef {
        let mut flow = URef::flow_def(def);
        flow.dict_mut().set(flow_def::ID, crate::dict::UDictValue::UInt(id));
        flow
    }

    /// spec.md §8 scenario 2: a demuxer advertises flow ids 43 (`pic.`)
    /// and 44 (`sound.`); a selflow probe filtered to `Sound` with
    /// selector `auto` selects exactly flow 44; once 44 disappears from
    /// the super's advertisement, its wrapper sub-pipe is released.
    #[test]
    fn auto_selection_releases_its_sub_pipe_once_the_flow_disappears() {
        let mgr = UPipeManager::new(1, || Box::new(NullPipe));
        let super_pipe = mgr.alloc(silent_probe());
        let pic_flow = mgr.flow_alloc_sub(&super_pipe, silent_probe(), flow_with_id("pic.", 43)).unwrap();
        let sound_flow = mgr.flow_alloc_sub(&super_pipe, silent_probe(), flow_with_id("sound.", 44)).unwrap();
        assert_eq!(super_pipe.iterate_sub().len(), 2);

        let selflow = UProbeSelflow::new("auto", FlowType::Sound, mgr.clone());
        selflow.on_split_update(&super_pipe);

        // exactly one additional sub-pipe (the wrapper for flow 44) now
        // sits alongside the two advertised flows.
        assert_eq!(super_pipe.iterate_sub().len(), 3);
        assert_eq!(selflow.state.lock().unwrap().selected.len(), 1);
        assert_eq!(selflow.state.lock().unwrap().selected[0].0, 44);

        // flow 44 disappears from the super's advertisement.
        super_pipe.remove_sub(&sound_flow);
        selflow.on_split_update(&super_pipe);

        assert!(selflow.state.lock().unwrap().selected.is_empty(), "deselected flow must drop out of `selected`");
        // only the still-advertised `pic.` flow (id 43) remains; the
        // wrapper sub-pipe for 44 was detached by `reconcile`.
        assert_eq!(super_pipe.iterate_sub().len(), 1);
        assert_eq!(super_pipe.iterate_sub()[0].identity(), pic_flow.identity());
    }
}
