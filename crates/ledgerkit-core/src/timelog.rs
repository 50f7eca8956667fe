//! Clock-in/clock-out records turned into transactions.
//!
//! Each completed check-out becomes a transaction holding one virtual
//! posting of the elapsed time in seconds.

use chrono::{Duration, NaiveDateTime, NaiveTime};

use crate::account::AccountId;
use crate::amount::Amount;
use crate::error::{JournalError, JournalResult};
use crate::item::{ItemPosition, ItemState};
use crate::journal::Journal;
use crate::pool::CommodityPool;
use crate::post::{Post, PostFlags};
use crate::scope::Scope;
use crate::xact::Xact;

/// One `i`, `o` or `O` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeEvent {
    /// When it happened.
    pub checkin: NaiveDateTime,
    /// The account; optional for check-outs.
    pub account: Option<AccountId>,
    /// Payee text of a check-in, code text of a check-out.
    pub desc: String,
    /// Note after `;`.
    pub note: Option<String>,
    /// `O` rather than `o`: the posting is cleared.
    pub completed: bool,
    /// Where the line was read.
    pub position: Option<ItemPosition>,
}

impl TimeEvent {
    /// An event at `when` with nothing else set.
    pub fn new(when: NaiveDateTime, account: Option<AccountId>) -> Self {
        Self {
            checkin: when,
            account,
            desc: String::new(),
            note: None,
            completed: false,
            position: None,
        }
    }
}

/// Check-ins that have not been closed yet.
#[derive(Debug, Default)]
pub struct TimeLog {
    active: Vec<TimeEvent>,
}

impl TimeLog {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open check-ins.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is clocked in.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Open a check-in.
    pub fn clock_in(&mut self, event: TimeEvent) -> JournalResult<()> {
        if self
            .active
            .iter()
            .any(|open| open.account == event.account)
        {
            return Err(JournalError::DoubleCheckin);
        }
        self.active.push(event);
        Ok(())
    }

    /// Close the check-in matching `event` and record the time spent.
    ///
    /// Returns the number of transactions recorded, more than one when
    /// `day_break` splits the span at midnight.
    pub fn clock_out(
        &mut self,
        event: TimeEvent,
        journal: &mut Journal,
        pool: &CommodityPool,
        scope: &dyn Scope,
    ) -> JournalResult<usize> {
        let index = match (self.active.len(), event.account) {
            (0, _) => return Err(JournalError::CheckoutWithoutCheckin),
            (1, _) => 0,
            (_, None) => return Err(JournalError::CheckoutRequiresAccount),
            (_, Some(account)) => self
                .active
                .iter()
                .position(|open| open.account == Some(account))
                .ok_or(JournalError::CheckoutDoesNotMatch)?,
        };
        if event.account.is_some() && self.active[index].account != event.account {
            return Err(JournalError::CheckoutDoesNotMatch);
        }

        let mut checkin = self.active.remove(index);
        if event.checkin < checkin.checkin {
            return Err(JournalError::CheckoutBeforeCheckin);
        }
        if checkin.desc.is_empty() && !event.desc.is_empty() {
            checkin.desc.clone_from(&event.desc);
        }
        if event.note.is_some() && checkin.note.is_none() {
            checkin.note.clone_from(&event.note);
        }

        if !journal.options().day_break() {
            record(&checkin, &event, journal, pool, scope)?;
            return Ok(1);
        }

        let mut count = 0;
        loop {
            let next_midnight = (checkin.checkin.date() + Duration::days(1)).and_time(NaiveTime::MIN);
            if event.checkin <= next_midnight {
                break;
            }
            let split = TimeEvent {
                checkin: next_midnight,
                ..event.clone()
            };
            record(&checkin, &split, journal, pool, scope)?;
            checkin.checkin = next_midnight;
            count += 1;
        }
        record(&checkin, &event, journal, pool, scope)?;
        Ok(count + 1)
    }

    /// Close every open check-in at the session's current time.
    pub fn close(
        &mut self,
        journal: &mut Journal,
        pool: &CommodityPool,
        scope: &dyn Scope,
    ) -> JournalResult<usize> {
        let now = pool.date_context().current_time();
        let mut count = 0;
        while let Some(open) = self.active.last() {
            let event = TimeEvent::new(now, open.account);
            count += self.clock_out(event, journal, pool, scope)?;
        }
        Ok(count)
    }
}

fn record(
    checkin: &TimeEvent,
    checkout: &TimeEvent,
    journal: &mut Journal,
    pool: &CommodityPool,
    scope: &dyn Scope,
) -> JournalResult<()> {
    let account = checkin.account.unwrap_or_else(|| journal.find_account("Unknown"));
    let mut xact = Xact::new(checkin.checkin.date(), checkin.desc.clone());
    if !checkout.desc.is_empty() {
        xact.code = Some(checkout.desc.clone());
    }
    xact.item.position.clone_from(&checkin.position);
    if let Some(note) = &checkin.note {
        xact.item.append_note(note, pool, scope, false)?;
    }

    let seconds = (checkout.checkin - checkin.checkin).num_seconds();
    let amount = Amount::parse(&format!("{seconds}s"), pool)?;
    let mut post = Post::new(account, amount);
    post.flags |= PostFlags::VIRTUAL;
    if checkout.completed {
        post.item.state = ItemState::Cleared;
    }
    post.item.position.clone_from(&checkin.position);
    xact.posts.push(post);

    tracing::debug!(account = journal.accounts.full_name(account), seconds, "timelog entry");
    if journal.add_xact(xact, pool, scope)? {
        Ok(())
    } else {
        Err(JournalError::FailedToRecordTimelog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::SymbolScope;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap()
    }

    fn setup() -> (Journal, CommodityPool, SymbolScope<'static>) {
        (Journal::new(), CommodityPool::with_builtins(), SymbolScope::new())
    }

    #[test]
    fn test_clock_in_and_out() {
        let (mut journal, pool, scope) = setup();
        let project = journal.find_account("Work:Project");
        let mut log = TimeLog::new();

        let mut checkin = TimeEvent::new(at(1, 9, 0), Some(project));
        checkin.desc = "Client".to_string();
        log.clock_in(checkin).unwrap();
        let mut checkout = TimeEvent::new(at(1, 10, 30), None);
        checkout.completed = true;
        assert_eq!(log.clock_out(checkout, &mut journal, &pool, &scope).unwrap(), 1);

        assert!(log.is_empty());
        let xact = &journal.xacts[0];
        assert_eq!(xact.payee, "Client");
        assert_eq!(xact.posts[0].amount.to_i64().unwrap(), 5400);
        assert!(xact.posts[0].is_virtual());
        assert_eq!(xact.posts[0].item.state, ItemState::Cleared);
    }

    #[test]
    fn test_double_checkin() {
        let mut journal = Journal::new();
        let project = journal.find_account("Work");
        let mut log = TimeLog::new();
        log.clock_in(TimeEvent::new(at(1, 9, 0), Some(project))).unwrap();
        assert_eq!(
            log.clock_in(TimeEvent::new(at(1, 10, 0), Some(project))),
            Err(JournalError::DoubleCheckin)
        );
    }

    #[test]
    fn test_checkout_errors() {
        let (mut journal, pool, scope) = setup();
        let a = journal.find_account("A");
        let b = journal.find_account("B");
        let c = journal.find_account("C");
        let mut log = TimeLog::new();

        assert_eq!(
            log.clock_out(TimeEvent::new(at(1, 9, 0), None), &mut journal, &pool, &scope),
            Err(JournalError::CheckoutWithoutCheckin)
        );
        log.clock_in(TimeEvent::new(at(1, 9, 0), Some(a))).unwrap();
        log.clock_in(TimeEvent::new(at(1, 9, 0), Some(b))).unwrap();
        assert_eq!(
            log.clock_out(TimeEvent::new(at(1, 10, 0), None), &mut journal, &pool, &scope),
            Err(JournalError::CheckoutRequiresAccount)
        );
        assert_eq!(
            log.clock_out(TimeEvent::new(at(1, 10, 0), Some(c)), &mut journal, &pool, &scope),
            Err(JournalError::CheckoutDoesNotMatch)
        );
        assert_eq!(
            log.clock_out(TimeEvent::new(at(1, 8, 0), Some(a)), &mut journal, &pool, &scope),
            Err(JournalError::CheckoutBeforeCheckin)
        );
    }

    #[test]
    fn test_day_break_splits() {
        let (mut journal, pool, scope) = setup();
        journal.options().set_day_break(true);
        let work = journal.find_account("Work");
        let mut log = TimeLog::new();
        log.clock_in(TimeEvent::new(at(1, 22, 0), Some(work))).unwrap();
        let count = log
            .clock_out(TimeEvent::new(at(3, 2, 0), None), &mut journal, &pool, &scope)
            .unwrap();
        assert_eq!(count, 3);
        let seconds: Vec<i64> = journal
            .xacts
            .iter()
            .map(|x| x.posts[0].amount.to_i64().unwrap())
            .collect();
        assert_eq!(seconds, vec![7200, 86400, 7200]);
        assert_eq!(journal.xacts[1].item.date, NaiveDate::from_ymd_opt(2024, 3, 2));
    }

    #[test]
    fn test_close_open_checkins() {
        let (mut journal, pool, scope) = setup();
        pool.date_context().set_epoch(Some(at(1, 12, 0)));
        let work = journal.find_account("Work");
        let mut log = TimeLog::new();
        log.clock_in(TimeEvent::new(at(1, 11, 0), Some(work))).unwrap();
        assert_eq!(log.close(&mut journal, &pool, &scope).unwrap(), 1);
        assert_eq!(journal.xacts[0].posts[0].amount.to_i64().unwrap(), 3600);
    }
}
