mod calendar;
mod catalog;
mod horizons;
